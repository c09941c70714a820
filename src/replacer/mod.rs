//! # Pod Replacer
//!
//! Swaps a workload-managed pod for a development replacement and reverts
//! that swap.
//!
//! ## Replace
//!
//! 1. Look for an existing replacement. If its parent and config
//!    fingerprints are unchanged, re-assert that the parent is scaled down
//!    and stop. Otherwise delete it and scale its parent back up.
//! 2. Select a fresh target pod and resolve its controlling workload.
//! 3. Build the replacement pod. Nothing in the cluster has been touched
//!    if this fails.
//! 4. Scale the parent to zero, wait for the original pod to terminate and
//!    create the replacement. If waiting or creating fails, the parent is
//!    scaled back up so a retry finds a fresh target again.
//!
//! ## Revert
//!
//! Delete the replacement and restore the parent's replica count.
//!
//! All state lives in cluster annotations, so both operations are safe to
//! re-run after a crash or timeout.

pub mod fingerprint;
pub mod resolver;
pub mod scale;
pub mod termination;
pub mod transform;

use crate::cluster::{ClusterApi, KubeClusterApi};
use crate::config::EngineConfig;
use crate::constants::{
    IMAGE_NAME_LABEL, PARENT_HASH_ANNOTATION, REPLACED_LABEL, REPLACE_CONFIG_HASH_ANNOTATION,
};
use crate::error::{Error, Result, ResultExt};
use crate::image::ImageResolver;
use crate::patch::{JsonPatchApplier, PatchApplier};
use crate::poll::guarded;
use crate::selector::{
    KubeTargetSelector, SelectOptions, SelectedPodContainer, TargetSelector, WaitStrategy,
};
use crate::spec::{ReplacementSpec, Selection};
use crate::workload::Workload;
use fingerprint::{fingerprint_spec, fingerprint_workload};
use k8s_openapi::api::core::v1::Pod;
use resolver::{parent_from_replaced, parent_markers, resolve_parent};
use scale::{quiesce, restore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use termination::{delete_and_wait, wait_for_termination};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use transform::{build_replacement, Fingerprints};

/// Result of a successful [`PodReplacer::replace_pod`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// An up-to-date replacement already exists
    Unchanged { pod: String },
    /// A new replacement was created
    Replaced {
        original: String,
        replacement: String,
        parent: String,
    },
}

/// Replacement engine
///
/// Stateless between calls; every decision is derived from the cluster.
#[derive(Clone)]
pub struct PodReplacer {
    cluster: Arc<dyn ClusterApi>,
    selector: Arc<dyn TargetSelector>,
    images: Arc<dyn ImageResolver>,
    patcher: Arc<dyn PatchApplier>,
    config: EngineConfig,
}

impl std::fmt::Debug for PodReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodReplacer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PodReplacer {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        selector: Arc<dyn TargetSelector>,
        images: Arc<dyn ImageResolver>,
        patcher: Arc<dyn PatchApplier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cluster,
            selector,
            images,
            patcher,
            config,
        }
    }

    /// Engine wired to the given cluster with the default selector and patcher
    pub fn with_cluster(
        cluster: Arc<dyn ClusterApi>,
        images: Arc<dyn ImageResolver>,
        config: EngineConfig,
    ) -> Self {
        let selector = Arc::new(KubeTargetSelector::new(Arc::clone(&cluster)));
        Self::new(cluster, selector, images, Arc::new(JsonPatchApplier), config)
    }

    /// Engine talking to a real cluster through kube-rs
    pub fn with_client(
        client: kube::Client,
        images: Arc<dyn ImageResolver>,
        config: EngineConfig,
    ) -> Self {
        Self::with_cluster(Arc::new(KubeClusterApi::new(client)), images, config)
    }

    /// Ensure an up-to-date replacement exists for the pod selected by `spec`
    #[instrument(skip_all, fields(namespace = spec.namespace_or(&self.config.default_namespace)))]
    pub async fn replace_pod(
        &self,
        spec: &ReplacementSpec,
        cancel: &CancellationToken,
    ) -> Result<ReplaceOutcome> {
        spec.validate()?;
        let namespace = spec.namespace_or(&self.config.default_namespace);

        let existing = self
            .find_replaced_pod(spec, namespace, self.config.find_replaced_timeout(), cancel)
            .await
            .step("find replaced pod")?;
        if let Some(existing) = existing {
            if !self.update_needed(&existing, spec, cancel).await? {
                info!(pod = existing.name(), "Replaced pod is up to date");
                return Ok(ReplaceOutcome::Unchanged {
                    pod: existing.name().to_string(),
                });
            }
        }

        let (target, parent) = self.find_replaceable(spec, namespace, cancel).await?;
        self.replace(&target, &parent, spec, cancel).await
    }

    /// Remove the replacement selected by `spec` and restore its parent
    ///
    /// Returns the removed replacement, or `None` when there was none.
    #[instrument(skip_all, fields(namespace = spec.namespace_or(&self.config.default_namespace)))]
    pub async fn revert_replace_pod(
        &self,
        spec: &ReplacementSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<SelectedPodContainer>> {
        spec.validate()?;
        let namespace = spec.namespace_or(&self.config.default_namespace);

        let Some(replaced) = self
            .find_replaced_pod(spec, namespace, self.config.revert_find_timeout(), cancel)
            .await
            .step("find replaced pod")?
        else {
            info!("No replaced pod found, nothing to revert");
            return Ok(None);
        };

        let parent = if parent_markers(&replaced.pod).is_some() {
            match parent_from_replaced(self.cluster.as_ref(), &replaced.pod, cancel).await {
                Ok(parent) => Some(parent),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    info!(pod = replaced.name(), error = %e, "Error getting replaced pod parent");
                    None
                }
            }
        } else {
            None
        };

        self.delete_replaced(&replaced, cancel)
            .await
            .step("delete replaced pod")?;

        if let Some(parent) = parent {
            restore(self.cluster.as_ref(), &parent, cancel)
                .await
                .step("scale up parent")?;
        }

        Ok(Some(replaced))
    }

    async fn delete_replaced(
        &self,
        replaced: &SelectedPodContainer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        delete_and_wait(
            self.cluster.as_ref(),
            replaced.namespace(),
            replaced.name(),
            self.config.delete_poll_interval(),
            self.config.termination_timeout(),
            cancel,
        )
        .await
    }

    /// Decide whether `existing` must be rebuilt, tearing it down if so
    async fn update_needed(
        &self,
        existing: &SelectedPodContainer,
        spec: &ReplacementSpec,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if parent_markers(&existing.pod).is_none() {
            warn!(pod = existing.name(), "Replaced pod carries no parent markers, recreating");
            self.delete_replaced(existing, cancel)
                .await
                .step("delete replaced pod")?;
            return Ok(true);
        }

        let parent = match parent_from_replaced(self.cluster.as_ref(), &existing.pod, cancel).await {
            Ok(parent) => parent,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(pod = existing.name(), error = %e, "Error getting replaced pod parent, recreating");
                self.delete_replaced(existing, cancel)
                    .await
                    .step("delete replaced pod")?;
                return Ok(true);
            }
        };

        let fingerprints = self.fingerprints(&parent, spec)?;
        let annotations = existing.pod.metadata.annotations.as_ref();
        let recorded = |key: &str| annotations.and_then(|a| a.get(key)).map(String::as_str);

        if recorded(PARENT_HASH_ANNOTATION) == Some(fingerprints.parent_hash.as_str())
            && recorded(REPLACE_CONFIG_HASH_ANNOTATION) == Some(fingerprints.config_hash.as_str())
        {
            match quiesce(self.cluster.as_ref(), &parent, cancel).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(parent = %parent.identity(), error = %e, "Error scaling down parent"),
            }
            return Ok(false);
        }

        info!(pod = existing.name(), "Change detected for replaced pod, recreating");
        self.delete_replaced(existing, cancel)
            .await
            .step("delete replaced pod")?;
        restore(self.cluster.as_ref(), &parent, cancel)
            .await
            .step("scale up parent")?;
        Ok(true)
    }

    fn fingerprints(&self, parent: &Workload, spec: &ReplacementSpec) -> Result<Fingerprints> {
        Ok(Fingerprints {
            parent_hash: fingerprint_workload(parent, spec, self.images.as_ref())
                .step("hash parent pod spec")?,
            config_hash: fingerprint_spec(spec).step("hash config")?,
        })
    }

    fn select_options(
        &self,
        namespace: &str,
        label_selector: BTreeMap<String, String>,
        spec: &ReplacementSpec,
        timeout: Duration,
    ) -> SelectOptions {
        SelectOptions {
            namespace: namespace.to_string(),
            label_selector,
            image_selectors: Vec::new(),
            container_name: spec.container_name().map(str::to_string),
            exclude_replaced: false,
            timeout,
            wait: WaitStrategy::UntilNotTerminating {
                interval: self.config.select_poll_interval(),
            },
            allow_pick: false,
            skip_init_containers: true,
        }
    }

    /// Existing replacement for `spec`, if any shows up within `timeout`
    async fn find_replaced_pod(
        &self,
        spec: &ReplacementSpec,
        namespace: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<SelectedPodContainer>> {
        let mut labels = BTreeMap::from([(REPLACED_LABEL.to_string(), "true".to_string())]);
        match spec.selection()? {
            Selection::ImageName(image_name) => {
                labels.insert(IMAGE_NAME_LABEL.to_string(), image_name.to_string());
            }
            Selection::Labels(selector) => labels.extend(selector.clone()),
        }

        let options = self.select_options(namespace, labels, spec, timeout);
        self.selector.select_single_container(&options, cancel).await
    }

    /// Fresh target pod and its controlling workload
    async fn find_replaceable(
        &self,
        spec: &ReplacementSpec,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<(SelectedPodContainer, Workload)> {
        let (labels, image_selectors) = match spec.selection()? {
            Selection::ImageName(image_name) => (
                BTreeMap::new(),
                self.images
                    .resolve_selector(image_name)
                    .step("resolve image selector")?,
            ),
            Selection::Labels(selector) => (selector.clone(), Vec::new()),
        };

        let mut options =
            self.select_options(namespace, labels, spec, self.config.select_timeout());
        options.image_selectors = image_selectors;
        options.exclude_replaced = true;

        let target = self
            .selector
            .select_single_container(&options, cancel)
            .await
            .step("select target pod")?
            .ok_or_else(|| Error::TargetNotFound {
                namespace: namespace.to_string(),
            })?;

        let parent = resolve_parent(self.cluster.as_ref(), &target.pod, cancel)
            .await
            .step("get pod parent")?;
        Ok((target, parent))
    }

    async fn replace(
        &self,
        target: &SelectedPodContainer,
        parent: &Workload,
        spec: &ReplacementSpec,
        cancel: &CancellationToken,
    ) -> Result<ReplaceOutcome> {
        let fingerprints = self.fingerprints(parent, spec)?;
        let replacement = build_replacement(
            target,
            parent,
            spec,
            self.images.as_ref(),
            self.patcher.as_ref(),
            &fingerprints,
        )
        .step("build replacement pod")?;

        let quiesced = quiesce(self.cluster.as_ref(), parent, cancel)
            .await
            .step("scale down parent")?;

        let created = match self.swap_in(target, parent, &replacement, cancel).await {
            Ok(created) => created,
            Err(e) => {
                if quiesced {
                    self.roll_back(parent).await;
                }
                return Err(e);
            }
        };
        let replacement = created
            .metadata
            .name
            .or(replacement.metadata.name)
            .unwrap_or_default();

        info!(
            original = target.name(),
            replacement = %replacement,
            parent = %parent.identity(),
            "Replaced pod"
        );
        Ok(ReplaceOutcome::Replaced {
            original: target.name().to_string(),
            replacement,
            parent: parent.identity(),
        })
    }

    /// Wait for the original pod to go away and create the replacement
    async fn swap_in(
        &self,
        target: &SelectedPodContainer,
        parent: &Workload,
        replacement: &Pod,
        cancel: &CancellationToken,
    ) -> Result<Pod> {
        wait_for_termination(
            self.cluster.as_ref(),
            target.namespace(),
            target.name(),
            parent.kind(),
            self.config.termination_poll_interval(),
            self.config.termination_timeout(),
            cancel,
        )
        .await
        .step("wait for original pod to terminate")?;

        guarded(cancel, self.cluster.create_pod(replacement))
            .await
            .step("create replacement pod")
    }

    /// Best-effort scale up of a parent quiesced by a replace that then failed
    ///
    /// Runs on its own token so an interrupted replace still hands the
    /// workload back to its controller.
    async fn roll_back(&self, parent: &Workload) {
        let cancel = CancellationToken::new();
        let current = guarded(
            &cancel,
            self.cluster
                .get_workload(parent.kind(), parent.namespace(), parent.name()),
        )
        .await;

        let result = match current {
            Ok(Some(current)) => restore(self.cluster.as_ref(), &current, &cancel).await,
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => info!(parent = %parent.identity(), "Rolled back scale down of parent"),
            Err(e) => {
                warn!(parent = %parent.identity(), error = %e, "Error scaling parent back up after failed replace");
            }
        }
    }
}
