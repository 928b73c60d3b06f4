//! Container image references: `[registry/]namespace/name[:tag][@digest]`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ImageRefError;

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Namespace of single-component names on the default registry (`alpine`).
pub const OFFICIAL_NAMESPACE: &str = "library";

/// Hosts that are aliases of [`DEFAULT_REGISTRY`].
const DEFAULT_REGISTRY_ALIASES: &[&str] = &["index.docker.io", "registry-1.docker.io"];

static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("component pattern is valid")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern is valid")
});

static DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[A-Fa-f0-9]{32,}$").expect("digest pattern is valid")
});

static REGISTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*(?::[0-9]+)?$",
    )
    .expect("registry pattern is valid")
});

/// Registry- and tag-independent identity of an image: `namespace/name`.
///
/// This is the unit the trust gate compares.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageName {
    /// Possibly multi-segment (`org/team`); empty for single-component
    /// names on a non-default registry.
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// A parsed, normalized container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    image: ImageName,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse the conventional textual form. Registry defaults to `docker.io`.
    pub fn parse(raw: &str) -> Result<Self, ImageRefError> {
        if raw.is_empty() {
            return Err(ImageRefError::Empty);
        }

        let (remainder, digest) = match raw.split_once('@') {
            Some((rest, digest)) => {
                if !DIGEST.is_match(digest) {
                    return Err(ImageRefError::InvalidDigest(digest.to_string()));
                }
                (rest, Some(digest.to_string()))
            }
            None => (raw, None),
        };

        let mut parts: Vec<&str> = remainder.split('/').collect();
        let registry = if parts.len() > 1 && looks_like_registry(parts[0]) {
            let host = parts.remove(0);
            if !REGISTRY.is_match(host) {
                return Err(ImageRefError::InvalidRegistry(host.to_string()));
            }
            normalize_registry(host)
        } else {
            DEFAULT_REGISTRY.to_string()
        };

        let last = parts.pop().unwrap_or_default();
        let (name, tag) = match last.split_once(':') {
            Some((name, tag)) => {
                if !TAG.is_match(tag) {
                    return Err(ImageRefError::InvalidTag(tag.to_string()));
                }
                (name, Some(tag.to_string()))
            }
            None => (last, None),
        };

        for component in parts.iter().chain(std::iter::once(&name)) {
            if !COMPONENT.is_match(component) {
                return Err(ImageRefError::InvalidComponent(component.to_string()));
            }
        }

        let namespace = if parts.is_empty() && registry == DEFAULT_REGISTRY {
            OFFICIAL_NAMESPACE.to_string()
        } else {
            parts.join("/")
        };

        Ok(Self {
            registry,
            image: ImageName {
                namespace,
                name: name.to_string(),
            },
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn namespace(&self) -> &str {
        &self.image.namespace
    }

    pub fn name(&self) -> &str {
        &self.image.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The `(namespace, name)` identity, ignoring registry, tag and digest.
    pub fn image_name(&self) -> &ImageName {
        &self.image
    }
}

impl FromStr for ImageReference {
    type Err = ImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.image)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn looks_like_registry(component: &str) -> bool {
    component == "localhost" || component.contains('.') || component.contains(':')
}

fn normalize_registry(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    if DEFAULT_REGISTRY_ALIASES.contains(&lower.as_str()) {
        DEFAULT_REGISTRY.to_string()
    } else {
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_name_defaults() {
        let image = ImageReference::parse("plugins/docker").unwrap();
        assert_eq!(image.registry(), "docker.io");
        assert_eq!(image.namespace(), "plugins");
        assert_eq!(image.name(), "docker");
        assert_eq!(image.tag(), None);
    }

    #[test]
    fn test_parse_official_image() {
        let image = ImageReference::parse("alpine:3.19").unwrap();
        assert_eq!(image.image_name().to_string(), "library/alpine");
        assert_eq!(image.tag(), Some("3.19"));
    }

    #[test]
    fn test_parse_full_reference() {
        let image =
            ImageReference::parse("docker.io/woodpeckerci/plugin-git:v1.6.0").unwrap();
        assert_eq!(image.registry(), "docker.io");
        assert_eq!(image.namespace(), "woodpeckerci");
        assert_eq!(image.name(), "plugin-git");
        assert_eq!(image.tag(), Some("v1.6.0"));
        assert_eq!(image.to_string(), "docker.io/woodpeckerci/plugin-git:v1.6.0");
    }

    #[test]
    fn test_parse_registry_with_port_and_nested_namespace() {
        let image = ImageReference::parse("localhost:5000/org/team/app:1").unwrap();
        assert_eq!(image.registry(), "localhost:5000");
        assert_eq!(image.namespace(), "org/team");
        assert_eq!(image.name(), "app");
    }

    #[test]
    fn test_registry_aliases_normalize() {
        let image = ImageReference::parse("index.docker.io/plugins/gcr").unwrap();
        assert_eq!(image.registry(), "docker.io");
    }

    #[test]
    fn test_single_component_on_private_registry_has_no_namespace() {
        let image = ImageReference::parse("ghcr.io/tool").unwrap();
        assert_eq!(image.namespace(), "");
        assert_eq!(image.image_name().to_string(), "tool");
    }

    #[test]
    fn test_parse_digest() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let image = ImageReference::parse(&format!("plugins/ecr@{digest}")).unwrap();
        assert_eq!(image.digest(), Some(digest.as_str()));
        assert_eq!(image.tag(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(ImageReference::parse(""), Err(ImageRefError::Empty));
        assert!(matches!(
            ImageReference::parse(" plugins/docker"),
            Err(ImageRefError::InvalidComponent(_))
        ));
        assert!(matches!(
            ImageReference::parse("Plugins/Docker"),
            Err(ImageRefError::InvalidComponent(_))
        ));
        assert!(matches!(
            ImageReference::parse("plugins/docker:"),
            Err(ImageRefError::InvalidTag(_))
        ));
        assert!(matches!(
            ImageReference::parse("plugins//docker"),
            Err(ImageRefError::InvalidComponent(_))
        ));
        assert!(matches!(
            ImageReference::parse("plugins/docker@sha256:xyz"),
            Err(ImageRefError::InvalidDigest(_))
        ));
        assert!(matches!(
            ImageReference::parse("plugins/docker dind"),
            Err(ImageRefError::InvalidComponent(_))
        ));
    }
}
