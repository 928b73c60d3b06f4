//! Privileged plugin trust gate.
//!
//! Decides whether a container image may run with elevated host privileges
//! (container runtime socket, privileged mode). The gate is default-deny:
//! only images whose `namespace/name` is listed exactly are trusted, and any
//! reference that fails to parse is untrusted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PolicyError;
use crate::image::{ImageName, ImageReference};

/// Immutable set of privileged `namespace/name` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct TrustList {
    entries: BTreeSet<ImageName>,
}

impl TrustList {
    /// Build a trust list from `namespace/name` entries.
    ///
    /// Entries must carry neither registry, tag nor digest, and must have an
    /// explicit namespace. Patterns (`*`) are rejected.
    pub fn new<I, S>(entries: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for raw in entries {
            let raw = raw.as_ref();
            let name = parse_entry(raw)?;
            if !set.insert(name) {
                return Err(PolicyError::InvalidTrustEntry {
                    entry: raw.to_string(),
                    reason: "listed more than once".to_string(),
                });
            }
        }
        Ok(Self { entries: set })
    }

    /// An empty list: nothing is privileged.
    pub fn empty() -> Self {
        Self {
            entries: BTreeSet::new(),
        }
    }

    pub fn contains(&self, name: &ImageName) -> bool {
        self.entries.contains(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageName> {
        self.entries.iter()
    }

    /// Whether `image` may request elevated privileges.
    ///
    /// Registry host, tag and digest are ignored. Never fails: an unparseable
    /// reference is not privileged.
    pub fn is_privileged(&self, image: &str) -> bool {
        match ImageReference::parse(image) {
            Ok(reference) => self.is_privileged_ref(&reference),
            Err(e) => {
                debug!(image = %image, error = %e, "unparseable image treated as unprivileged");
                false
            }
        }
    }

    /// Same as [`is_privileged`](Self::is_privileged) for a parsed reference.
    pub fn is_privileged_ref(&self, image: &ImageReference) -> bool {
        self.contains(image.image_name())
    }
}

impl From<TrustList> for Vec<String> {
    fn from(list: TrustList) -> Self {
        list.entries.iter().map(ToString::to_string).collect()
    }
}

impl TryFrom<Vec<String>> for TrustList {
    type Error = PolicyError;

    fn try_from(entries: Vec<String>) -> Result<Self, Self::Error> {
        TrustList::new(entries)
    }
}

fn parse_entry(raw: &str) -> Result<ImageName, PolicyError> {
    let invalid = |reason: String| PolicyError::InvalidTrustEntry {
        entry: raw.to_string(),
        reason,
    };

    if raw.contains('*') {
        return Err(invalid("patterns are not allowed".to_string()));
    }
    let reference = ImageReference::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if reference.tag().is_some() || reference.digest().is_some() {
        return Err(invalid("must not carry a tag or digest".to_string()));
    }
    // A registry host or implicit `library/` namespace shows up as a segment
    // count mismatch.
    let segments = raw.split('/').count();
    let namespace = reference.namespace();
    if namespace.is_empty() || segments != namespace.split('/').count() + 1 {
        return Err(invalid("must be exactly 'namespace/name'".to_string()));
    }
    Ok(reference.image_name().clone())
}
