//! Resolution results: which configuration is authoritative, and its contents.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::candidate::ConfigCandidate;

/// The authoritative pipeline configuration of a repository.
///
/// Produced once per build and handed to the pipeline parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedConfig {
    /// A file candidate matched.
    File { path: String },

    /// A directory candidate matched. `files` is in discovery order, which
    /// is also the merge order when the parser combines them.
    Directory { path: String, files: Vec<String> },
}

impl ResolvedConfig {
    /// Path of the candidate that matched.
    pub fn source(&self) -> &str {
        match self {
            ResolvedConfig::File { path } | ResolvedConfig::Directory { path, .. } => path,
        }
    }

    /// Repository-relative paths of every configuration file, in order.
    pub fn files(&self) -> Vec<&str> {
        match self {
            ResolvedConfig::File { path } => vec![path.as_str()],
            ResolvedConfig::Directory { files, .. } => files.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, ResolvedConfig::Directory { .. })
    }

    /// The candidate form of the match (directories keep their trailing `/`).
    pub fn candidate(&self) -> ConfigCandidate {
        match self {
            ResolvedConfig::File { path } => ConfigCandidate::File(path.clone()),
            ResolvedConfig::Directory { path, .. } => ConfigCandidate::Directory(path.clone()),
        }
    }
}

/// One configuration file with its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: String,
    pub data: Vec<u8>,
    digest: String,
}

impl ConfigFile {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        let digest = hex::encode(Sha256::digest(&data));
        Self {
            path: path.into(),
            data,
            digest,
        }
    }

    /// SHA-256 of the contents, lowercase hex.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// A resolved configuration with every file loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub resolved: ResolvedConfig,
    /// Same order as [`ResolvedConfig::files`].
    pub files: Vec<ConfigFile>,
}

impl LoadedConfig {
    /// Combined digest over `(path, content digest)` pairs in order.
    ///
    /// Identical configurations yield identical digests, so unchanged
    /// pipelines can be deduplicated across builds.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.path.as_bytes());
            hasher.update(b"\0");
            hasher.update(file.digest.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }

    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.data.len()).sum()
    }
}
