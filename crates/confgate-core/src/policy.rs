//! Process-wide resolution and trust policy.
//!
//! A [`Policy`] bundles the three values that decide how a build is set up:
//!
//! - the ordered configuration search list (first match wins)
//! - the privileged plugin allow-list
//! - the default clone image
//!
//! The built-in values are compiled in. A deployment may replace them once,
//! at process start, through [`install`]; after that the policy is frozen.
//! There is deliberately no way to alter a policy per repository or per
//! request.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{LazyLock, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::candidate::ConfigCandidate;
use crate::error::{PolicyError, PolicyResult};
use crate::image::ImageReference;
use crate::trust::TrustList;

/// Search order for pipeline configuration. Directories end in `/`.
pub const DEFAULT_CONFIG_ORDER: &[&str] = &[
    ".woodpecker/",
    ".woodpecker.yml",
    ".woodpecker.yaml",
    ".drone.yml",
];

/// Plugin images allowed to run privileged.
pub const PRIVILEGED_PLUGINS: &[&str] = &[
    "plugins/docker",
    "plugins/gcr",
    "plugins/ecr",
    "woodpeckerci/plugin-docker",
    "woodpeckerci/plugin-docker-buildx",
];

/// Image used for clone steps that do not name one.
pub const DEFAULT_CLONE_IMAGE: &str = "docker.io/woodpeckerci/plugin-git:v1.6.0";

static BUILTIN: LazyLock<Policy> = LazyLock::new(|| {
    Policy::new(DEFAULT_CONFIG_ORDER, PRIVILEGED_PLUGINS, DEFAULT_CLONE_IMAGE)
        .expect("built-in policy is valid")
});

static INSTALLED: OnceLock<Policy> = OnceLock::new();

/// Frozen resolution and trust policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    config_order: Vec<ConfigCandidate>,
    trust: TrustList,
    default_clone_image: ImageReference,
}

impl Policy {
    /// Build and validate a policy.
    pub fn new<O, P>(config_order: O, privileged_plugins: P, default_clone_image: &str) -> PolicyResult<Self>
    where
        O: IntoIterator,
        O::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        for raw in config_order {
            let candidate = ConfigCandidate::parse(raw.as_ref())?;
            // `ci` and `ci/` name the same path; only one can ever exist.
            if !seen.insert(candidate.path().to_string()) {
                return Err(PolicyError::DuplicateCandidate(candidate.to_string()));
            }
            order.push(candidate);
        }
        if order.is_empty() {
            return Err(PolicyError::EmptyConfigOrder);
        }

        let trust = TrustList::new(privileged_plugins)?;

        let clone_image = ImageReference::parse(default_clone_image).map_err(|source| {
            PolicyError::InvalidCloneImage {
                image: default_clone_image.to_string(),
                source,
            }
        })?;
        if trust.is_privileged_ref(&clone_image) {
            return Err(PolicyError::PrivilegedCloneImage(default_clone_image.to_string()));
        }

        Ok(Self {
            config_order: order,
            trust,
            default_clone_image: clone_image,
        })
    }

    /// The compiled-in policy.
    pub fn builtin() -> &'static Policy {
        &BUILTIN
    }

    /// Build a policy from a deployment document; omitted keys keep their
    /// built-in values.
    pub fn from_document(doc: PolicyDocument) -> PolicyResult<Self> {
        let builtin = Policy::builtin().to_document();
        let order = doc.config_order.or(builtin.config_order).unwrap_or_default();
        let plugins = doc
            .privileged_plugins
            .or(builtin.privileged_plugins)
            .unwrap_or_default();
        let clone_image = doc
            .default_clone_image
            .or(builtin.default_clone_image)
            .unwrap_or_default();
        Policy::new(order, plugins, &clone_image)
    }

    /// Parse a TOML deployment document.
    pub fn from_toml_str(raw: &str) -> PolicyResult<Self> {
        let doc: PolicyDocument = toml::from_str(raw)?;
        Policy::from_document(doc)
    }

    /// Read a TOML deployment document from disk.
    pub fn load(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Policy::from_toml_str(&raw)
    }

    pub fn config_order(&self) -> &[ConfigCandidate] {
        &self.config_order
    }

    pub fn trust_list(&self) -> &TrustList {
        &self.trust
    }

    pub fn default_clone_image(&self) -> &ImageReference {
        &self.default_clone_image
    }

    /// Trust gate shortcut, see [`TrustList::is_privileged`].
    pub fn is_privileged(&self, image: &str) -> bool {
        self.trust.is_privileged(image)
    }

    /// Fully populated document describing this policy.
    pub fn to_document(&self) -> PolicyDocument {
        PolicyDocument {
            config_order: Some(self.config_order.iter().map(ToString::to_string).collect()),
            privileged_plugins: Some(self.trust.iter().map(ToString::to_string).collect()),
            default_clone_image: Some(self.default_clone_image.to_string()),
        }
    }
}

/// Deployment-time policy override, as written in the policy file.
///
/// ```toml
/// config_order = [".ci/", ".ci.yml"]
/// privileged_plugins = ["plugins/docker"]
/// default_clone_image = "docker.io/woodpeckerci/plugin-git:v1.6.0"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_order: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged_plugins: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_clone_image: Option<String>,
}

/// Install the process-wide policy.
///
/// Succeeds only once, and only before the first call to [`current`].
pub fn install(policy: Policy) -> PolicyResult<&'static Policy> {
    let mut installed = false;
    let active = INSTALLED.get_or_init(|| {
        installed = true;
        policy
    });
    if !installed {
        return Err(PolicyError::AlreadyInitialized);
    }
    info!(
        candidates = active.config_order.len(),
        privileged = active.trust.len(),
        clone_image = %active.default_clone_image,
        "Installed process-wide policy"
    );
    Ok(active)
}

/// The active process-wide policy.
///
/// Freezes the built-in policy if none was installed.
pub fn current() -> &'static Policy {
    INSTALLED.get_or_init(|| Policy::builtin().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_order_is_exact() {
        let order: Vec<String> = Policy::builtin()
            .config_order()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(order, DEFAULT_CONFIG_ORDER);
        assert!(Policy::builtin().config_order()[0].is_directory());
    }

    #[test]
    fn test_builtin_trust_list() {
        let policy = Policy::builtin();
        assert_eq!(policy.trust_list().len(), PRIVILEGED_PLUGINS.len());
        for plugin in PRIVILEGED_PLUGINS {
            assert!(policy.is_privileged(plugin), "{plugin} should be privileged");
        }
    }

    #[test]
    fn test_builtin_clone_image_is_unprivileged() {
        let policy = Policy::builtin();
        assert_eq!(policy.default_clone_image().to_string(), DEFAULT_CLONE_IMAGE);
        assert!(!policy.is_privileged(DEFAULT_CLONE_IMAGE));
    }

    #[test]
    fn test_empty_order_rejected() {
        let result = Policy::new(Vec::<String>::new(), PRIVILEGED_PLUGINS, DEFAULT_CLONE_IMAGE);
        assert!(matches!(result, Err(PolicyError::EmptyConfigOrder)));
    }

    #[test]
    fn test_duplicate_candidates_rejected() {
        let result = Policy::new([".ci/", ".ci"], PRIVILEGED_PLUGINS, DEFAULT_CLONE_IMAGE);
        assert!(matches!(result, Err(PolicyError::DuplicateCandidate(_))));

        let result = Policy::new([".ci.yml", ".ci.yml"], PRIVILEGED_PLUGINS, DEFAULT_CLONE_IMAGE);
        assert!(matches!(result, Err(PolicyError::DuplicateCandidate(_))));
    }

    #[test]
    fn test_privileged_clone_image_rejected() {
        let result = Policy::new(DEFAULT_CONFIG_ORDER, ["plugins/git"], "plugins/git:1");
        assert!(matches!(result, Err(PolicyError::PrivilegedCloneImage(_))));
    }

    #[test]
    fn test_invalid_clone_image_rejected() {
        let result = Policy::new(DEFAULT_CONFIG_ORDER, PRIVILEGED_PLUGINS, "Not An Image");
        assert!(matches!(result, Err(PolicyError::InvalidCloneImage { .. })));
    }

    #[test]
    fn test_toml_partial_override_keeps_builtins() {
        let policy = Policy::from_toml_str(r#"config_order = [".ci.yml", ".ci/"]"#).unwrap();
        assert_eq!(policy.config_order().len(), 2);
        assert_eq!(policy.trust_list(), Policy::builtin().trust_list());
        assert_eq!(
            policy.default_clone_image(),
            Policy::builtin().default_clone_image()
        );
    }

    #[test]
    fn test_toml_unknown_key_rejected() {
        let result = Policy::from_toml_str(r#"allow_everything = true"#);
        assert!(matches!(result, Err(PolicyError::Parse(_))));
    }

    #[test]
    fn test_toml_empty_trust_list_allowed() {
        let policy = Policy::from_toml_str("privileged_plugins = []").unwrap();
        assert!(policy.trust_list().is_empty());
        assert!(!policy.is_privileged("plugins/docker"));
    }

    #[test]
    fn test_document_roundtrip() {
        let doc = Policy::builtin().to_document();
        let rebuilt = Policy::from_document(doc).unwrap();
        assert_eq!(&rebuilt, Policy::builtin());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Policy::load("/nonexistent/confgate-policy.toml");
        assert!(matches!(result, Err(PolicyError::Read { .. })));
    }

    #[test]
    fn test_install_after_current_fails() {
        let frozen = current();
        let result = install(Policy::builtin().clone());
        assert!(matches!(result, Err(PolicyError::AlreadyInitialized)));
        assert_eq!(frozen, current());
    }
}
