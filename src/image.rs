//! # Image Resolution
//!
//! Turns config image names and `replaceImage` expressions into literal image
//! references, and compares image references the way container runtimes
//! normalise them.
//!
//! ## Image config
//!
//! ```yaml
//! images:
//!   backend:
//!     image: registry.example.com/team/backend
//!     tags: ["dev"]
//! generated:
//!   backend:
//!     imageName: registry.example.com/team/backend
//!     tag: a1b2c3
//! dependencies:
//!   auth:
//!     images:
//!       api:
//!         image: registry.example.com/team/auth-api
//! ```

use crate::error::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Resolves image names for the replacement engine
///
/// Implementations must be pure: the change fingerprinter calls them and
/// relies on identical answers for identical inputs.
pub trait ImageResolver: Send + Sync {
    /// Resolve a config image name into the images it selects
    ///
    /// An empty name selects nothing and yields an empty list.
    fn resolve_selector(&self, image_name: &str) -> Result<Vec<String>>;

    /// Resolve a `replaceImage` expression into a literal image reference
    fn resolve_replace_image(&self, expression: &str) -> Result<String>;
}

/// Image definition from the project config
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub image: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Image and tag produced by the last build
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub image_name: String,
    pub tag: String,
}

/// Resolver backed by the project's image config
///
/// Dotted names (`dependency.image`) are resolved through the named
/// dependency's own resolver.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigImageResolver {
    #[serde(default)]
    pub images: BTreeMap<String, ImageConfig>,
    #[serde(default)]
    pub generated: BTreeMap<String, GeneratedImage>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, ConfigImageResolver>,
}

impl ConfigImageResolver {
    /// Parse an image config from YAML
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(Error::serialization)
    }

    /// Image name and optional tag for a config image name
    fn lookup(&self, name: &str) -> Option<(String, Option<String>)> {
        if let (Some(generated), true) = (self.generated.get(name), self.images.contains_key(name)) {
            if !generated.image_name.is_empty() && !generated.tag.is_empty() {
                return Some((generated.image_name.clone(), Some(generated.tag.clone())));
            }
        }

        if let Some(config) = self.images.get(name) {
            return Some((config.image.clone(), config.tags.first().cloned()));
        }

        let (dependency, rest) = name.split_once('.')?;
        self.dependencies.get(dependency)?.lookup(rest)
    }

    fn lookup_or_err(&self, name: &str) -> Result<(String, Option<String>)> {
        self.lookup(name)
            .ok_or_else(|| Error::ImageResolution(format!("couldn't find imageName {name}")))
    }
}

impl ImageResolver for ConfigImageResolver {
    fn resolve_selector(&self, image_name: &str) -> Result<Vec<String>> {
        if image_name.is_empty() {
            return Ok(Vec::new());
        }

        let (image, tag) = self.lookup_or_err(image_name)?;
        Ok(vec![match tag {
            Some(tag) => format!("{image}:{tag}"),
            None => image,
        }])
    }

    /// Supported forms:
    /// - a config image name, resolved to `image:tag` (tag defaults to `latest`)
    /// - `image(name)` and `tag(name)` placeholders anywhere in a literal,
    ///   e.g. `image(backend):tag(backend)` or `image(backend):debug`
    /// - any other literal, returned unchanged
    fn resolve_replace_image(&self, expression: &str) -> Result<String> {
        let expression = expression.trim();
        if let Some((image, tag)) = self.lookup(expression) {
            return Ok(format!("{image}:{}", tag.as_deref().unwrap_or("latest")));
        }

        let mut failure = None;
        let resolved = PLACEHOLDER.replace_all(expression, |caps: &regex::Captures<'_>| {
            match self.lookup_or_err(&caps[2]) {
                Ok((image, tag)) => {
                    if &caps[1] == "image" {
                        image
                    } else {
                        tag.unwrap_or_else(|| "latest".to_string())
                    }
                }
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(resolved.into_owned()),
        }
    }
}

/// `image(name)` and `tag(name)` placeholders in `replaceImage`
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(image|tag)\(\s*([A-Za-z0-9_.\-]+)\s*\)")
        .expect("Failed to compile image placeholder regex - this should never happen")
});

/// Image name without tag or digest
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?::[0-9]+)?(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$",
    )
    .expect("Failed to compile image reference regex - this should never happen")
});

/// Strip tag and digest from an image reference and normalise Docker Hub names
///
/// `docker.io/library/nginx:1.25` and `nginx` both become `nginx`,
/// `docker.io/bitnami/redis` becomes `bitnami/redis`, other registries keep
/// their host. Returns `None` for references that do not parse.
pub fn strip_image_name(image: &str) -> Option<String> {
    let image = image.trim();
    let without_digest = image.split_once('@').map_or(image, |(name, _)| name);
    let last_slash = without_digest.rfind('/').map_or(0, |i| i + 1);
    let name = match without_digest[last_slash..].find(':') {
        Some(colon) => &without_digest[..last_slash + colon],
        None => without_digest,
    };

    if !REFERENCE.is_match(name) {
        return None;
    }

    let (domain, path) = match name.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            (first, rest)
        }
        _ => ("docker.io", name),
    };

    if domain == "docker.io" || domain == "index.docker.io" {
        Some(path.strip_prefix("library/").unwrap_or(path).to_string())
    } else {
        Some(format!("{domain}/{path}"))
    }
}

/// Whether a container image matches an image selector
///
/// A selector with a tag must match exactly, except that `name:latest` also
/// matches an untagged `name`, and `#` in the selector matches any single
/// letter. A selector without a tag matches every tag of the same image.
pub fn compare_image_names(selector: &str, image: &str) -> bool {
    let stripped_selector =
        strip_image_name(&selector.replace('#', "a")).unwrap_or_else(|| selector.to_string());
    let stripped_image = strip_image_name(image).unwrap_or_else(|| image.to_string());

    if stripped_selector == selector {
        return stripped_selector == stripped_image;
    }

    if format!("{stripped_selector}:latest") == selector && stripped_image == image {
        return true;
    }

    if selector.contains('#') {
        let pattern = selector
            .split('#')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("[a-zA-Z]");
        if let Ok(exp) = Regex::new(&format!("^{pattern}$")) {
            return exp.is_match(image);
        }
    }

    selector == image
}
