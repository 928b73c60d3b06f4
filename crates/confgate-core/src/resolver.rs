//! Pipeline configuration resolution.
//!
//! Walks the policy's candidate list once, in declared order, and stops at
//! the first match:
//!
//! - a file candidate matches when a regular file exists at its path
//! - a directory candidate matches when the directory holds at least one
//!   direct `.yml`/`.yaml` file child; the match is those files sorted by
//!   name (subdirectories are not descended into)
//!
//! An empty directory, or one without config files, does not match and the
//! walk continues. Exhausting the list is [`ResolveError::NotFound`]. A tree
//! query that fails aborts resolution with [`ResolveError::Tree`]; it is
//! never mistaken for an absent path.

use std::future::Future;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::candidate::{is_config_file_name, ConfigCandidate};
use crate::config::{ConfigFile, LoadedConfig, ResolvedConfig};
use crate::error::{ResolveError, ResolveResult, TreeError, TreeResult};
use crate::policy::{self, Policy};
use crate::tree::{join_path, EntryKind, RepositoryTree};

/// Stateless configuration resolver over a fixed candidate list.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'p> {
    candidates: &'p [ConfigCandidate],
    query_timeout: Option<Duration>,
}

impl<'p> Resolver<'p> {
    pub fn new(policy: &'p Policy) -> Self {
        Self::with_candidates(policy.config_order())
    }

    pub fn with_candidates(candidates: &'p [ConfigCandidate]) -> Self {
        Self {
            candidates,
            query_timeout: None,
        }
    }

    /// Bound every individual tree query by `limit`.
    pub fn with_query_timeout(mut self, limit: Duration) -> Self {
        self.query_timeout = Some(limit);
        self
    }

    pub fn candidates(&self) -> &'p [ConfigCandidate] {
        self.candidates
    }

    /// Locate the authoritative configuration in `tree`.
    pub async fn resolve<T>(&self, tree: &T) -> ResolveResult<ResolvedConfig>
    where
        T: RepositoryTree + ?Sized,
    {
        for candidate in self.candidates {
            let matched = match candidate {
                ConfigCandidate::File(path) => self.match_file(tree, path).await?,
                ConfigCandidate::Directory(path) => self.match_directory(tree, path).await?,
            };
            if let Some(resolved) = matched {
                info!(
                    source = %candidate,
                    files = resolved.files().len(),
                    "Resolved pipeline configuration"
                );
                return Ok(resolved);
            }
            debug!(candidate = %candidate, "Candidate did not match");
        }

        let searched: Vec<String> = self.candidates.iter().map(ToString::to_string).collect();
        info!(searched = ?searched, "No pipeline configuration found");
        Err(ResolveError::NotFound { searched })
    }

    /// Resolve, then read every configuration file.
    ///
    /// Files are fetched concurrently; the result keeps discovery order.
    pub async fn load<T>(&self, tree: &T) -> ResolveResult<LoadedConfig>
    where
        T: RepositoryTree + ?Sized,
    {
        let resolved = self.resolve(tree).await?;
        let reads = resolved.files().into_iter().map(|path| async move {
            let data = self.query(path, tree.read_file(path)).await?;
            Ok::<_, TreeError>(ConfigFile::new(path, data))
        });
        let files = try_join_all(reads).await?;
        debug!(
            source = %resolved.source(),
            files = files.len(),
            "Loaded pipeline configuration"
        );
        Ok(LoadedConfig { resolved, files })
    }

    async fn match_file<T>(&self, tree: &T, path: &str) -> TreeResult<Option<ResolvedConfig>>
    where
        T: RepositoryTree + ?Sized,
    {
        let kind = self.query(path, tree.entry_kind(path)).await?;
        Ok((kind == Some(EntryKind::File)).then(|| ResolvedConfig::File {
            path: path.to_string(),
        }))
    }

    async fn match_directory<T>(&self, tree: &T, path: &str) -> TreeResult<Option<ResolvedConfig>>
    where
        T: RepositoryTree + ?Sized,
    {
        let kind = self.query(path, tree.entry_kind(path)).await?;
        if kind != Some(EntryKind::Directory) {
            return Ok(None);
        }

        let children = self.query(path, tree.list_children(path)).await?;
        let mut names: Vec<String> = children
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File && is_config_file_name(&entry.name))
            .map(|entry| entry.name)
            .collect();
        if names.is_empty() {
            debug!(directory = %path, "Directory holds no config files");
            return Ok(None);
        }
        names.sort();
        names.dedup();

        Ok(Some(ResolvedConfig::Directory {
            path: path.to_string(),
            files: names.iter().map(|name| join_path(path, name)).collect(),
        }))
    }

    async fn query<R>(&self, path: &str, fut: impl Future<Output = TreeResult<R>>) -> TreeResult<R> {
        match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| TreeError::Timeout {
                    path: path.to_string(),
                    limit_ms: saturating_millis(limit),
                })?,
            None => fut.await,
        }
    }
}

fn saturating_millis(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}

impl Default for Resolver<'static> {
    /// Resolver over the process-wide policy.
    fn default() -> Self {
        Resolver::new(policy::current())
    }
}
