//! Candidate locations for a repository's pipeline configuration.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// One entry of the configuration search order.
///
/// Textual form: a trailing `/` marks a directory pattern, anything else is a
/// file pattern. Paths are relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ConfigCandidate {
    /// Exact file path, e.g. `.woodpecker.yml`.
    File(String),
    /// Directory whose direct config-file children form the configuration,
    /// e.g. `.woodpecker` (stored without the trailing separator).
    Directory(String),
}

impl ConfigCandidate {
    /// Parse a candidate from its textual form.
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        let invalid = |reason: &str| PolicyError::InvalidCandidate {
            candidate: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty path"));
        }

        let (path, is_dir) = match trimmed.strip_suffix('/') {
            Some(dir) => (dir.trim_end_matches('/'), true),
            None => (trimmed, false),
        };
        if path.is_empty() {
            return Err(invalid("refers to the repository root"));
        }
        if path.contains('\\') {
            return Err(invalid("must use '/' as separator"));
        }

        for component in Path::new(path).components() {
            match component {
                Component::Normal(_) => {}
                Component::CurDir => return Err(invalid("must not contain '.' segments")),
                Component::ParentDir => return Err(invalid("must not contain '..' segments")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("must be relative to the repository root"))
                }
            }
        }

        Ok(if is_dir {
            ConfigCandidate::Directory(path.to_string())
        } else {
            ConfigCandidate::File(path.to_string())
        })
    }

    /// Repository-relative path, without trailing separator.
    pub fn path(&self) -> &str {
        match self {
            ConfigCandidate::File(p) | ConfigCandidate::Directory(p) => p,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, ConfigCandidate::Directory(_))
    }
}

impl fmt::Display for ConfigCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigCandidate::File(p) => write!(f, "{p}"),
            ConfigCandidate::Directory(p) => write!(f, "{p}/"),
        }
    }
}

/// Whether a file name inside a directory candidate counts as a config file.
pub fn is_config_file_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower
        .strip_suffix(".yml")
        .or_else(|| lower.strip_suffix(".yaml"))
        .is_some_and(|stem| !stem.is_empty())
}
