use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{join_path, EntryKind, RepositoryTree, TreeEntry};
use crate::error::{TreeError, TreeResult};

/// In-memory repository tree.
///
/// Parent directories of every file are created implicitly. Individual paths
/// can be made to fail or stall, and every query is logged so tests can
/// assert what the resolver actually looked at.
#[derive(Debug, Default)]
pub struct MemoryTree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    failing: BTreeSet<String>,
    failing_reads: BTreeSet<String>,
    delays: HashMap<String, Duration>,
    queries: Mutex<Vec<String>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (and its parent directories).
    pub fn with_file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        let path = normalize(path);
        self.add_parents(&path);
        self.files.insert(path, contents.into());
        self
    }

    /// Add a directory, possibly empty.
    pub fn with_dir(mut self, path: &str) -> Self {
        let path = normalize(path);
        self.add_parents(&path);
        self.dirs.insert(path);
        self
    }

    /// Every query touching `path` fails with [`TreeError::Unavailable`].
    pub fn failing(mut self, path: &str) -> Self {
        self.failing.insert(normalize(path));
        self
    }

    /// Only `read_file` on `path` fails; kind and listing queries succeed.
    pub fn failing_reads(mut self, path: &str) -> Self {
        self.failing_reads.insert(normalize(path));
        self
    }

    /// Every query touching `path` sleeps for `delay` before answering.
    pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(normalize(path), delay);
        self
    }

    /// Paths queried so far, in order.
    pub fn queried(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn add_parents(&mut self, path: &str) {
        let mut current = String::new();
        let mut segments = path.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                break;
            }
            current = join_path(&current, segment);
            self.dirs.insert(current.clone());
        }
    }

    async fn observe(&self, path: &str) -> TreeResult<String> {
        let path = normalize(path);
        self.queries.lock().unwrap().push(path.clone());
        if let Some(delay) = self.delays.get(&path) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&path) {
            return Err(TreeError::Unavailable(format!("injected failure for '{path}'")));
        }
        Ok(path)
    }
}

#[async_trait]
impl RepositoryTree for MemoryTree {
    async fn entry_kind(&self, path: &str) -> TreeResult<Option<EntryKind>> {
        let path = self.observe(path).await?;
        if self.files.contains_key(&path) {
            Ok(Some(EntryKind::File))
        } else if self.dirs.contains(&path) {
            Ok(Some(EntryKind::Directory))
        } else {
            Ok(None)
        }
    }

    async fn list_children(&self, path: &str) -> TreeResult<Vec<TreeEntry>> {
        let path = self.observe(path).await?;
        let prefix = format!("{path}/");
        let direct_child = |candidate: &String| {
            candidate
                .strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
        };

        let mut children: Vec<TreeEntry> = self
            .files
            .keys()
            .filter_map(direct_child)
            .map(TreeEntry::file)
            .collect();
        children.extend(self.dirs.iter().filter_map(direct_child).map(TreeEntry::directory));
        Ok(children)
    }

    async fn read_file(&self, path: &str) -> TreeResult<Vec<u8>> {
        let path = self.observe(path).await?;
        if self.failing_reads.contains(&path) {
            return Err(TreeError::Unavailable(format!("injected read failure for '{path}'")));
        }
        self.files.get(&path).cloned().ok_or_else(|| TreeError::Io {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}
