//! Read-only view of a repository's paths at one revision.
//!
//! The resolver only asks two questions of a tree: what kind of entry sits
//! at a path, and what the direct children of a directory are. Loading the
//! resolved configuration additionally reads file contents.
//!
//! Paths are repository-relative and use `/` as separator.
//!
//! # Implementations
//!
//! - [`fs::FsTree`] — a checked-out working copy on local disk
//! - [`memory::MemoryTree`] — in-memory tree with injectable failures (testing)

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TreeResult;

/// What kind of entry exists at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// A direct child of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    /// File name only, no directory prefix.
    pub name: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// Repository tree queried during configuration resolution.
///
/// Contract:
/// - an absent path yields `Ok(None)` / `Ok(false)` / `Ok(vec![])`, never an error
/// - an error means the answer could not be determined
#[async_trait]
pub trait RepositoryTree: Send + Sync {
    /// Kind of the entry at `path`, or `None` if nothing exists there.
    async fn entry_kind(&self, path: &str) -> TreeResult<Option<EntryKind>>;

    /// Direct children of the directory at `path`. Empty if the directory
    /// does not exist.
    async fn list_children(&self, path: &str) -> TreeResult<Vec<TreeEntry>>;

    /// Full contents of the file at `path`. Unlike the queries above, a
    /// missing file is an error here: callers only read what they found.
    async fn read_file(&self, path: &str) -> TreeResult<Vec<u8>>;

    /// Whether any entry exists at `path`.
    async fn exists(&self, path: &str) -> TreeResult<bool> {
        Ok(self.entry_kind(path).await?.is_some())
    }
}

/// Join a repository-relative directory and child name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
