//! Replacement pod construction.
//!
//! A replacement is the selected pod with the configured image and patches
//! applied, fresh metadata and the markers that tie it back to its parent.

use crate::constants::{
    CONTROLLER_LABELS, IMAGE_NAME_LABEL, MATCHED_CONTAINER_ANNOTATION, MAX_NAME_LENGTH,
    PARENT_HASH_ANNOTATION, PARENT_KIND_ANNOTATION, PARENT_NAME_ANNOTATION, REPLACED_LABEL,
    REPLACED_POD_SUFFIX, REPLACE_CONFIG_HASH_ANNOTATION,
};
use crate::error::{Error, Result, ResultExt};
use crate::image::{compare_image_names, ImageResolver};
use crate::patch::PatchApplier;
use crate::selector::SelectedPodContainer;
use crate::spec::{ReplacementSpec, Selection};
use crate::workload::Workload;
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};

/// Fingerprints stamped on a replacement pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    pub parent_hash: String,
    pub config_hash: String,
}

/// Join name parts with `-`, keeping the result a valid object name
///
/// Names longer than 63 characters are cut to 52 characters and suffixed
/// with the first 10 hex digits of the full name's SHA-256.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let digest = hex_digest(full.as_bytes());
    let mut cut = 52;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &full[..cut], &digest[..10])
}

/// Lower-case hex SHA-256
pub(crate) fn hex_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Substitute the configured replacement image into `pod_spec`
///
/// Label-selected specs pick the only container or the one named by
/// `containerName`. Image-selected specs pick the only container or the first
/// one running the selected image. Used for both the replacement pod and the
/// parent fingerprint, so both see the same substitution.
pub fn substitute_image(
    pod_spec: &mut PodSpec,
    spec: &ReplacementSpec,
    images: &dyn ImageResolver,
) -> Result<()> {
    let Some(expression) = spec.replace_image() else {
        return Ok(());
    };
    let image = images.resolve_replace_image(expression)?;

    let count = pod_spec.containers.len();
    if count == 0 {
        return Err(Error::NoContainers);
    }

    let index = match spec.selection()? {
        Selection::Labels(_) => match (count, spec.container_name()) {
            (1, _) => 0,
            (_, None) => return Err(Error::AmbiguousContainer { count }),
            (_, Some(name)) => pod_spec
                .containers
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| Error::NoMatchingContainer {
                    criteria: format!("containerName {name}"),
                })?,
        },
        Selection::ImageName(image_name) => {
            let selectors = images.resolve_selector(image_name)?;
            let [selector] = selectors.as_slice() else {
                return Err(Error::AmbiguousImage {
                    image_name: image_name.to_string(),
                    count: selectors.len(),
                });
            };

            if count == 1 {
                0
            } else {
                pod_spec
                    .containers
                    .iter()
                    .position(|c| {
                        c.image
                            .as_deref()
                            .is_some_and(|current| compare_image_names(selector, current))
                    })
                    .ok_or_else(|| Error::NoMatchingContainer {
                        criteria: format!("image {selector}"),
                    })?
            }
        }
    };

    pod_spec.containers[index].image = Some(image);
    Ok(())
}

/// Run the configured patches over a pod
fn apply_pod_patches(pod: Pod, spec: &ReplacementSpec, patcher: &dyn PatchApplier) -> Result<Pod> {
    if spec.patches.is_empty() {
        return Ok(pod);
    }

    let patched = patcher.apply_patches(serde_json::to_value(&pod)?, &spec.patches)?;
    Ok(serde_json::from_value(patched)?)
}

/// Build the replacement for `selected`, cut from `parent`
///
/// The result has no status, no server-populated metadata and none of the
/// labels workload controllers use to adopt pods.
pub fn build_replacement(
    selected: &SelectedPodContainer,
    parent: &Workload,
    spec: &ReplacementSpec,
    images: &dyn ImageResolver,
    patcher: &dyn PatchApplier,
    fingerprints: &Fingerprints,
) -> Result<Pod> {
    let mut pod = selected.pod.clone();
    if let Some(pod_spec) = pod.spec.as_mut() {
        substitute_image(pod_spec, spec, images).step("replace image")?;
    } else if spec.replace_image().is_some() {
        return Err(Error::NoContainers);
    }

    let mut pod = apply_pod_patches(pod, spec, patcher).step("apply pod patches")?;
    let original_name = pod.metadata.name.take().unwrap_or_default();

    let mut labels = pod.metadata.labels.take().unwrap_or_default();
    for label in CONTROLLER_LABELS {
        labels.remove(label);
    }
    labels.insert(REPLACED_LABEL.to_string(), "true".to_string());
    if let Selection::ImageName(image_name) = spec.selection()? {
        labels.insert(IMAGE_NAME_LABEL.to_string(), image_name.to_string());
    }

    let mut annotations = pod.metadata.annotations.take().unwrap_or_default();
    annotations.extend([
        (
            MATCHED_CONTAINER_ANNOTATION.to_string(),
            selected.container.name.clone(),
        ),
        (
            PARENT_HASH_ANNOTATION.to_string(),
            fingerprints.parent_hash.clone(),
        ),
        (
            REPLACE_CONFIG_HASH_ANNOTATION.to_string(),
            fingerprints.config_hash.clone(),
        ),
        (PARENT_NAME_ANNOTATION.to_string(), parent.name().to_string()),
        (PARENT_KIND_ANNOTATION.to_string(), parent.kind().to_string()),
    ]);

    pod.metadata = ObjectMeta {
        name: Some(safe_concat_name(&[&original_name, REPLACED_POD_SUFFIX])),
        namespace: pod.metadata.namespace.take(),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    };
    pod.status = None;

    Ok(pod)
}
