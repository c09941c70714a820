//! Waiting for pods to go away.

use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::poll::{guarded, poll_until};
use crate::workload::WorkloadKind;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Delete a pod and wait until the API no longer returns it
///
/// A pod that is already gone counts as deleted.
pub async fn delete_and_wait(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(namespace, pod = name, "Waiting for replaced pod to get terminated");
    if !guarded(cancel, cluster.delete_pod(namespace, name)).await? {
        return Ok(());
    }

    poll_until(
        &format!("pod {namespace}/{name} to be deleted"),
        interval,
        timeout,
        cancel,
        move || async move { Ok(cluster.get_pod(namespace, name).await?.is_none().then_some(())) },
    )
    .await?;

    info!(namespace, pod = name, "Deleted replaced pod");
    Ok(())
}

/// Wait until the original pod of a quiesced workload has terminated
///
/// Pods of StatefulSets must be gone entirely since the replacement may
/// reuse their identity. For other kinds a deletion timestamp is enough.
pub async fn wait_for_termination(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    kind: WorkloadKind,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(namespace, pod = name, %kind, "Waiting for pod to get terminated");
    poll_until(
        &format!("pod {namespace}/{name} to terminate"),
        interval,
        timeout,
        cancel,
        move || async move {
            let done = match cluster.get_pod(namespace, name).await? {
                None => true,
                Some(pod) => {
                    pod.metadata.deletion_timestamp.is_some() && !kind.requires_full_termination()
                }
            };
            Ok(done.then_some(()))
        },
    )
    .await
}
