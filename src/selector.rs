//! # Target Selection
//!
//! Finds the single pod and container a replacement operates on.
//!
//! The engine depends on [`TargetSelector`]; [`KubeTargetSelector`] is a
//! straightforward implementation that lists pods by label, filters their
//! containers by name or image and waits until a matching pod is no longer
//! terminating.

use crate::cluster::ClusterApi;
use crate::constants::REPLACED_LABEL;
use crate::error::Result;
use crate::image::compare_image_names;
use crate::poll::poll_until;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Pod};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A pod together with the container that matched the selection criteria
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedPodContainer {
    pub pod: Pod,
    pub container: Container,
}

impl SelectedPodContainer {
    pub fn name(&self) -> &str {
        self.pod.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.pod.metadata.namespace.as_deref().unwrap_or_default()
    }
}

/// How long and how the selector waits for a usable pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Only return pods without a deletion timestamp, polling at `interval`
    UntilNotTerminating { interval: Duration },
}

/// Selection criteria passed to a [`TargetSelector`]
#[derive(Debug, Clone, PartialEq)]
pub struct SelectOptions {
    pub namespace: String,
    pub label_selector: BTreeMap<String, String>,
    /// Literal image references, any of which a container may run
    pub image_selectors: Vec<String>,
    pub container_name: Option<String>,
    /// Ignore pods that are themselves replacements
    pub exclude_replaced: bool,
    pub timeout: Duration,
    pub wait: WaitStrategy,
    /// Interactive picking between several candidates; the engine never enables it
    pub allow_pick: bool,
    pub skip_init_containers: bool,
}

impl SelectOptions {
    /// Label selector in Kubernetes list syntax
    pub fn label_selector_string(&self) -> String {
        let mut terms = self
            .label_selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();
        if self.exclude_replaced {
            terms.push(format!("!{REPLACED_LABEL}"));
        }
        terms.join(",")
    }
}

/// Selects a single pod container, `None` meaning nothing matched in time
#[async_trait]
pub trait TargetSelector: Send + Sync {
    async fn select_single_container(
        &self,
        options: &SelectOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<SelectedPodContainer>>;
}

/// Label and image based selector on top of [`ClusterApi`]
#[derive(Clone)]
pub struct KubeTargetSelector {
    cluster: Arc<dyn ClusterApi>,
}

impl std::fmt::Debug for KubeTargetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTargetSelector").finish_non_exhaustive()
    }
}

impl KubeTargetSelector {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Candidates in the order they are picked: newest pod first, then by name
    async fn candidates(&self, options: &SelectOptions) -> Result<Vec<SelectedPodContainer>> {
        let mut pods = self
            .cluster
            .list_pods(&options.namespace, &options.label_selector_string())
            .await?;
        pods.sort_by(|a, b| {
            Reverse(&a.metadata.creation_timestamp)
                .cmp(&Reverse(&b.metadata.creation_timestamp))
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });

        Ok(pods
            .into_iter()
            .filter_map(|pod| {
                let container = matching_container(&pod, options)?;
                Some(SelectedPodContainer { pod, container })
            })
            .collect())
    }
}

/// First container of `pod` satisfying the container name and image criteria
fn matching_container(pod: &Pod, options: &SelectOptions) -> Option<Container> {
    let spec = pod.spec.as_ref()?;
    let init_containers = if options.skip_init_containers {
        &[][..]
    } else {
        spec.init_containers.as_deref().unwrap_or_default()
    };

    spec.containers
        .iter()
        .chain(init_containers)
        .find(|c| {
            let name_matches = options
                .container_name
                .as_deref()
                .is_none_or(|name| c.name == name);
            let image_matches = options.image_selectors.is_empty()
                || options.image_selectors.iter().any(|selector| {
                    c.image
                        .as_deref()
                        .is_some_and(|image| compare_image_names(selector, image))
                });
            name_matches && image_matches
        })
        .cloned()
}

#[async_trait]
impl TargetSelector for KubeTargetSelector {
    async fn select_single_container(
        &self,
        options: &SelectOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<SelectedPodContainer>> {
        let WaitStrategy::UntilNotTerminating { interval } = options.wait;
        let operation = format!(
            "pod matching [{}] in namespace {}",
            options.label_selector_string(),
            options.namespace
        );

        let selected = poll_until(&operation, interval, options.timeout, cancel, || async {
            let candidates = self.candidates(options).await?;
            let total = candidates.len();
            let ready = candidates
                .into_iter()
                .find(|c| c.pod.metadata.deletion_timestamp.is_none());
            if ready.is_none() && total > 0 {
                debug!(
                    namespace = %options.namespace,
                    candidates = total,
                    "Only terminating pods match, waiting"
                );
            }
            Ok(ready)
        })
        .await;

        match selected {
            Ok(selected) => {
                debug!(
                    pod = selected.name(),
                    container = %selected.container.name,
                    "Selected pod container"
                );
                Ok(Some(selected))
            }
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
