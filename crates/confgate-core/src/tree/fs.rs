use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{EntryKind, RepositoryTree, TreeEntry};
use crate::error::{TreeError, TreeResult};

/// Working copy on local disk, rooted at `root`.
///
/// Paths that are absolute or contain `..` are rejected, and every path is
/// canonicalized before it is inspected or read: a symlink whose target lies
/// outside the root is an [`TreeError::InvalidPath`] when queried directly
/// and is left out of directory listings. Dangling symlinks are absent.
#[derive(Debug, Clone)]
pub struct FsTree {
    root: PathBuf,
}

impl FsTree {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> TreeResult<PathBuf> {
        let relative = Path::new(path);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(invalid_path(path, "parent directory segments are not allowed"))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid_path(path, "path must be relative to the repository root"))
                }
            }
        }
        Ok(self.root.join(relative))
    }

    /// Canonical location of `path`, or `None` when it (or the root) does
    /// not exist. Fails when symlinks lead outside the root.
    async fn confined(&self, path: &str) -> TreeResult<Option<PathBuf>> {
        let full = self.full_path(path)?;
        let root = match tokio::fs::canonicalize(&self.root).await {
            Ok(root) => root,
            Err(e) if is_absent(&e) => return Ok(None),
            Err(e) => return Err(io_error(path, e)),
        };
        let resolved = match tokio::fs::canonicalize(&full).await {
            Ok(resolved) => resolved,
            Err(e) if is_absent(&e) => return Ok(None),
            Err(e) => return Err(io_error(path, e)),
        };
        if !resolved.starts_with(&root) {
            return Err(invalid_path(path, "resolves outside the repository root"));
        }
        Ok(Some(resolved))
    }
}

#[async_trait]
impl RepositoryTree for FsTree {
    async fn entry_kind(&self, path: &str) -> TreeResult<Option<EntryKind>> {
        let Some(full) = self.confined(path).await? else {
            return Ok(None);
        };
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Directory)),
            Ok(meta) if meta.is_file() => Ok(Some(EntryKind::File)),
            // Sockets, fifos, devices: not something a config can be.
            Ok(_) => Ok(None),
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn list_children(&self, path: &str) -> TreeResult<Vec<TreeEntry>> {
        let Some(full) = self.confined(path).await? else {
            return Ok(Vec::new());
        };
        let mut dir = match tokio::fs::read_dir(&full).await {
            Ok(dir) => dir,
            Err(e) if is_absent(&e) => return Ok(Vec::new()),
            Err(e) => return Err(io_error(path, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(path, e))? {
            // Non UTF-8 names cannot be addressed by repository paths.
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let child = super::join_path(path, &name);
            let target = match self.confined(&child).await {
                Ok(Some(target)) => target,
                // Dangling symlink.
                Ok(None) => continue,
                Err(TreeError::InvalidPath { reason, .. }) => {
                    debug!(path = %child, reason = %reason, "Skipping entry outside repository root");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let kind = match tokio::fs::metadata(&target).await {
                Ok(meta) if meta.is_dir() => EntryKind::Directory,
                Ok(meta) if meta.is_file() => EntryKind::File,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&child, e)),
            };
            entries.push(TreeEntry { name, kind });
        }
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> TreeResult<Vec<u8>> {
        let Some(full) = self.confined(path).await? else {
            return Err(io_error(
                path,
                std::io::Error::new(ErrorKind::NotFound, "no such file"),
            ));
        };
        tokio::fs::read(&full).await.map_err(|e| io_error(path, e))
    }
}

fn is_absent(e: &std::io::Error) -> bool {
    // NotADirectory is unstable as an ErrorKind; a file in the middle of
    // the path shows up as ENOTDIR on unix.
    e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(20)
}

fn io_error(path: &str, source: std::io::Error) -> TreeError {
    TreeError::Io {
        path: path.to_string(),
        source,
    }
}

fn invalid_path(path: &str, reason: &str) -> TreeError {
    TreeError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
