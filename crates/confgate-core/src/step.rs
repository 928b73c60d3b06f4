//! Build-setup normalization of pipeline steps.
//!
//! Runs after the pipeline parser and before scheduling:
//!
//! 1. inject an implicit clone step unless the pipeline defines one or opts out
//! 2. give clone steps without an image the policy's default clone image
//! 3. decide per step whether it runs elevated, through the trust gate
//!
//! Only plugin steps whose image is on the privileged list are elevated.
//! A step that runs its own commands never is, whatever its image. Clone
//! steps always get the minimal sandbox.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StepError;
use crate::policy::Policy;

/// Name given to the injected clone step.
pub const IMPLICIT_CLONE_STEP: &str = "clone";

/// What a step does, as far as privilege decisions are concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Fetches the repository into the workspace.
    Clone,
    /// Runs user-supplied commands inside the image.
    #[default]
    Commands,
    /// Runs the image's own entrypoint with settings only.
    Plugin,
}

/// A step as handed over by the pipeline parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,

    #[serde(default)]
    pub kind: StepKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Whether the pipeline asked for elevated privileges.
    #[serde(default)]
    pub privileged: bool,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, kind: StepKind, image: Option<&str>) -> Self {
        Self {
            name: name.into(),
            kind,
            image: image.map(str::to_string),
            privileged: false,
        }
    }

    pub fn requesting_privileges(mut self) -> Self {
        self.privileged = true;
        self
    }
}

/// Knobs for [`prepare_steps`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupOptions {
    /// Do not inject an implicit clone step.
    #[serde(default)]
    pub skip_clone: bool,
}

/// Where a prepared step's image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Declared,
    DefaultClone,
}

/// Outcome of the privilege decision for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum PrivilegeVerdict {
    /// Trusted plugin; runs with elevated host capabilities.
    Elevated,
    /// Default isolated sandbox.
    Sandboxed,
    /// Privileges were requested and refused; runs sandboxed.
    Denied { reason: String },
}

impl PrivilegeVerdict {
    pub fn is_elevated(&self) -> bool {
        matches!(self, PrivilegeVerdict::Elevated)
    }
}

/// A step ready for scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedStep {
    pub name: String,
    pub kind: StepKind,
    pub image: String,
    pub image_source: ImageSource,
    pub privilege: PrivilegeVerdict,
}

/// Decide whether a step with `kind` and `image` may run elevated.
pub fn evaluate_privilege(
    policy: &Policy,
    kind: StepKind,
    image: &str,
    requested: bool,
) -> PrivilegeVerdict {
    let trusted = policy.is_privileged(image);
    match kind {
        StepKind::Plugin if trusted => PrivilegeVerdict::Elevated,
        StepKind::Clone if requested => PrivilegeVerdict::Denied {
            reason: "clone steps never run privileged".to_string(),
        },
        StepKind::Commands if requested && trusted => PrivilegeVerdict::Denied {
            reason: format!("image '{image}' is only privileged when run as a plugin"),
        },
        _ if requested => PrivilegeVerdict::Denied {
            reason: format!("image '{image}' is not on the privileged plugin list"),
        },
        _ => PrivilegeVerdict::Sandboxed,
    }
}

/// Normalize parsed steps for scheduling.
pub fn prepare_steps(
    steps: Vec<StepSpec>,
    options: SetupOptions,
    policy: &Policy,
) -> Result<Vec<PreparedStep>, StepError> {
    let mut steps = steps;
    let has_clone = steps.iter().any(|s| s.kind == StepKind::Clone);
    if !has_clone && !options.skip_clone {
        debug!("Injecting implicit clone step");
        steps.insert(0, StepSpec::new(IMPLICIT_CLONE_STEP, StepKind::Clone, None));
    }

    let mut names = HashSet::new();
    let mut prepared = Vec::with_capacity(steps.len());
    for step in steps {
        if !names.insert(step.name.clone()) {
            return Err(StepError::DuplicateName(step.name));
        }

        let (image, image_source) = match (step.image, step.kind) {
            (Some(image), _) if !image.trim().is_empty() => (image, ImageSource::Declared),
            (_, StepKind::Clone) => {
                let image = policy.default_clone_image().to_string();
                debug!(step = %step.name, image = %image, "Substituted default clone image");
                (image, ImageSource::DefaultClone)
            }
            _ => return Err(StepError::MissingImage(step.name)),
        };

        let privilege = evaluate_privilege(policy, step.kind, &image, step.privileged);
        if let PrivilegeVerdict::Denied { reason } = &privilege {
            warn!(step = %step.name, image = %image, reason = %reason, "Privileged execution denied");
        }

        prepared.push(PreparedStep {
            name: step.name,
            kind: step.kind,
            image,
            image_source,
            privilege,
        });
    }
    Ok(prepared)
}
