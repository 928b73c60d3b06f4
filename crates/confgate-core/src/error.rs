//! Error types for confgate.

use thiserror::Error;

/// Errors raised by a [`RepositoryTree`](crate::tree::RepositoryTree) query.
///
/// A query error means "could not determine", never "does not exist".
/// Absent paths are reported through `Ok(false)` / `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Underlying I/O failed while inspecting `path`.
    #[error("failed to query '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The path is not acceptable for this tree (absolute, escapes the root, ...).
    #[error("invalid repository path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The query did not complete within the configured limit.
    #[error("query for '{path}' timed out after {limit_ms}ms")]
    Timeout { path: String, limit_ms: u64 },

    /// The backing store (forge API, object store, ...) could not be reached.
    #[error("repository tree unavailable: {0}")]
    Unavailable(String),
}

impl TreeError {
    /// Whether the caller may retry the query later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TreeError::InvalidPath { .. })
    }
}

/// Result type for repository tree queries.
pub type TreeResult<T> = std::result::Result<T, TreeError>;

/// Errors produced while resolving a pipeline configuration.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No candidate matched. The repository has no pipeline configuration.
    #[error("no pipeline configuration found (searched: {})", .searched.join(", "))]
    NotFound { searched: Vec<String> },

    /// A tree query failed, so the outcome is undetermined.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl ResolveError {
    /// `NotFound` is the repository owner's problem, not a system fault.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }

    /// Transient tree failures are eligible for retry; `NotFound` is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::NotFound { .. } => false,
            ResolveError::Tree(e) => e.is_retryable(),
        }
    }
}

/// Result type for resolution.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Errors produced while parsing an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRefError {
    #[error("image reference is empty")]
    Empty,

    #[error("invalid registry host '{0}'")]
    InvalidRegistry(String),

    #[error("invalid path component '{0}'")]
    InvalidComponent(String),

    #[error("invalid tag '{0}'")]
    InvalidTag(String),

    #[error("invalid digest '{0}'")]
    InvalidDigest(String),
}

/// Errors produced while building or installing a [`Policy`](crate::policy::Policy).
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("config order must contain at least one candidate")]
    EmptyConfigOrder,

    #[error("invalid config candidate '{candidate}': {reason}")]
    InvalidCandidate { candidate: String, reason: String },

    #[error("duplicate config candidate '{0}'")]
    DuplicateCandidate(String),

    #[error("invalid privileged plugin '{entry}': {reason}")]
    InvalidTrustEntry { entry: String, reason: String },

    #[error("invalid default clone image '{image}': {source}")]
    InvalidCloneImage {
        image: String,
        #[source]
        source: ImageRefError,
    },

    #[error("default clone image '{0}' is on the privileged list")]
    PrivilegedCloneImage(String),

    #[error("failed to read policy file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("process-wide policy is already initialized")]
    AlreadyInitialized,
}

/// Result type for policy operations.
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

/// Errors produced while preparing pipeline steps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("step '{0}' has no image")]
    MissingImage(String),

    #[error("duplicate step name '{0}'")]
    DuplicateName(String),
}
