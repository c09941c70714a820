//! Quiescing and restoring workloads.
//!
//! A quiesced workload runs zero replicas and remembers its previous count
//! in the replicas annotation. Both directions are sent as a merge patch of
//! exactly the fields they touch.

use crate::cluster::ClusterApi;
use crate::constants::REPLICAS_ANNOTATION;
use crate::error::{Error, Result};
use crate::patch::{is_empty_patch, merge_diff};
use crate::poll::guarded;
use crate::workload::Workload;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

async fn send_patch(
    cluster: &dyn ClusterApi,
    original: &Workload,
    modified: &Workload,
    cancel: &CancellationToken,
) -> Result<bool> {
    let patch = merge_diff(&original.to_value()?, &modified.to_value()?);
    if is_empty_patch(&patch) {
        return Ok(false);
    }

    debug!(workload = %original.identity(), patch = %patch, "Patching workload");
    guarded(
        cancel,
        cluster.patch_workload(original.kind(), original.namespace(), original.name(), &patch),
    )
    .await?;
    Ok(true)
}

/// Scale `workload` to zero, recording its current replica count
///
/// A workload already at zero is left alone, so an earlier recording is never
/// overwritten. Returns whether the workload was patched.
pub async fn quiesce(
    cluster: &dyn ClusterApi,
    workload: &Workload,
    cancel: &CancellationToken,
) -> Result<bool> {
    let replicas = workload.replicas().unwrap_or(1);
    if replicas == 0 {
        return Ok(false);
    }

    let mut modified = workload.clone();
    modified
        .annotations_mut()
        .insert(REPLICAS_ANNOTATION.to_string(), replicas.to_string());
    modified.set_replicas(0);

    let patched = send_patch(cluster, workload, &modified, cancel).await?;
    if patched {
        info!(workload = %workload.identity(), replicas, "Scaled down workload");
    }
    Ok(patched)
}

/// Scale `workload` back to its recorded replica count and drop the record
///
/// Without a recorded count this is a no-op. A recorded count of zero only
/// clears the annotation. Returns whether the workload was patched.
pub async fn restore(
    cluster: &dyn ClusterApi,
    workload: &Workload,
    cancel: &CancellationToken,
) -> Result<bool> {
    let Some(recorded) = workload
        .annotation(REPLICAS_ANNOTATION)
        .filter(|v| !v.is_empty())
    else {
        return Ok(false);
    };

    let replicas: i32 = recorded.trim().parse().map_err(|e| {
        Error::serialization(format!(
            "invalid {REPLICAS_ANNOTATION} annotation {recorded:?} on {}: {e}",
            workload.identity()
        ))
    })?;

    let mut modified = workload.clone();
    modified.annotations_mut().remove(REPLICAS_ANNOTATION);
    if replicas > 0 {
        modified.set_replicas(replicas);
    }

    let patched = send_patch(cluster, workload, &modified, cancel).await?;
    if patched {
        info!(workload = %workload.identity(), replicas, "Scaled up workload");
    }
    Ok(patched)
}
