//! # Replacement Spec
//!
//! The developer supplied description of which pod to replace and how.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes a single pod replacement
///
/// Exactly one of `image_name` and `label_selector` selects the target.
///
/// # Example
///
/// ```yaml
/// imageName: backend
/// namespace: dev
/// replaceImage: image(backend):dev-tag
/// patches:
///   - op: replace
///     path: /spec/containers/0/command
///     value: ["sleep", "infinity"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementSpec {
    /// Config image name the target container runs (resolved by the image resolver)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    /// Labels the target pod carries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<BTreeMap<String, String>>,
    /// Namespace of the target pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Container to substitute when the pod has several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Image expression for the substituted container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_image: Option<String>,
    /// Patches applied to the replacement pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchConfig>,
}

/// A single RFC 6902 style patch operation on the replacement pod
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchConfig {
    pub op: PatchOp,
    /// JSON pointer into the pod object, e.g. `/spec/containers/0/image`
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// How a spec selects its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection<'a> {
    ImageName(&'a str),
    Labels(&'a BTreeMap<String, String>),
}

impl ReplacementSpec {
    /// Check that exactly one selection criterion is set
    pub fn validate(&self) -> Result<()> {
        self.selection().map(|_| ())
    }

    /// The selection criterion of this spec
    pub fn selection(&self) -> Result<Selection<'_>> {
        let image_name = self.image_name.as_deref().filter(|s| !s.is_empty());
        let labels = self.label_selector.as_ref().filter(|l| !l.is_empty());

        match (image_name, labels) {
            (Some(image_name), None) => Ok(Selection::ImageName(image_name)),
            (None, Some(labels)) => Ok(Selection::Labels(labels)),
            (Some(_), Some(_)) => Err(Error::invalid_spec(
                "imageName and labelSelector are mutually exclusive",
            )),
            (None, None) => Err(Error::invalid_spec(
                "imageName or labelSelector need to be defined",
            )),
        }
    }

    /// Namespace of the target, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default_namespace)
    }

    /// Container name, treating an empty string as unset
    pub fn container_name(&self) -> Option<&str> {
        self.container_name.as_deref().filter(|s| !s.is_empty())
    }

    /// Image replacement expression, treating an empty string as unset
    pub fn replace_image(&self) -> Option<&str> {
        self.replace_image.as_deref().filter(|s| !s.is_empty())
    }

    /// Parse a spec from YAML
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let spec: Self = serde_yaml::from_str(raw).map_err(Error::serialization)?;
        spec.validate()?;
        Ok(spec)
    }
}
