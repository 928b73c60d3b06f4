//! confgate - pipeline configuration resolution and privileged plugin trust gate.
//!
//! Two pure decisions taken while a CI build is being set up:
//!
//! - [`Resolver`] finds the authoritative pipeline configuration in a
//!   repository tree by walking an ordered candidate list (first match wins)
//! - the trust gate ([`TrustList::is_privileged`]) decides whether a plugin
//!   image may run with elevated host privileges (exact allow-list, fail closed)
//!
//! Both read a process-wide [`Policy`] that is fixed at startup. [`step`]
//! applies them to parsed pipeline steps, including default clone image
//! substitution.

pub mod candidate;
pub mod config;
pub mod error;
pub mod image;
pub mod policy;
pub mod resolver;
pub mod step;
pub mod telemetry;
pub mod tree;
pub mod trust;

pub use candidate::ConfigCandidate;
pub use config::{ConfigFile, LoadedConfig, ResolvedConfig};
pub use error::{
    ImageRefError, PolicyError, PolicyResult, ResolveError, ResolveResult, StepError, TreeError,
    TreeResult,
};
pub use image::{ImageName, ImageReference};
pub use policy::{
    Policy, PolicyDocument, DEFAULT_CLONE_IMAGE, DEFAULT_CONFIG_ORDER, PRIVILEGED_PLUGINS,
};
pub use resolver::Resolver;
pub use step::{
    evaluate_privilege, prepare_steps, ImageSource, PreparedStep, PrivilegeVerdict, SetupOptions,
    StepKind, StepSpec,
};
pub use telemetry::init_tracing;
pub use tree::fs::FsTree;
pub use tree::memory::MemoryTree;
pub use tree::{EntryKind, RepositoryTree, TreeEntry};
pub use trust::TrustList;

/// Trust gate against the process-wide policy.
///
/// `true` only for images whose `namespace/name` is on the privileged list;
/// registry host and tag are ignored, malformed references are `false`.
pub fn is_privileged(image: &str) -> bool {
    policy::current().is_privileged(image)
}
