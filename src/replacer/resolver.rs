//! Controller resolution: from a pod to the workload whose replica count
//! governs it.

use crate::cluster::ClusterApi;
use crate::constants::{PARENT_KIND_ANNOTATION, PARENT_NAME_ANNOTATION};
use crate::error::{Error, Result};
use crate::poll::guarded;
use crate::workload::{Workload, WorkloadKind};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Owner reference flagged as the managing controller
fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.controller == Some(true))
}

async fn fetch(
    cluster: &dyn ClusterApi,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
    cancel: &CancellationToken,
) -> Result<Workload> {
    guarded(cancel, cluster.get_workload(kind, namespace, name))
        .await?
        .ok_or_else(|| Error::OwnerNotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
}

/// Resolve the workload that controls `pod`
///
/// A ReplicaSet owned by a Deployment resolves to the Deployment. A bare
/// ReplicaSet resolves to itself. Any other owner chain is rejected.
pub async fn resolve_parent(
    cluster: &dyn ClusterApi,
    pod: &Pod,
    cancel: &CancellationToken,
) -> Result<Workload> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
    let controller = controller_of(&pod.metadata).ok_or_else(|| Error::NoOwner {
        namespace: namespace.to_string(),
        name: pod_name.to_string(),
    })?;

    match controller.kind.as_str() {
        "ReplicaSet" => {
            let replica_set = fetch(
                cluster,
                WorkloadKind::ReplicaSet,
                namespace,
                &controller.name,
                cancel,
            )
            .await?;

            let Some(owner) = controller_of(replica_set.metadata()) else {
                debug!(replica_set = replica_set.name(), "ReplicaSet has no controller");
                return Ok(replica_set);
            };

            if owner.kind != "Deployment" {
                return Err(Error::UnsupportedOwner {
                    owned: format!("ReplicaSet {}", replica_set.name()),
                    kind: owner.kind.clone(),
                    api_version: owner.api_version.clone(),
                    name: owner.name.clone(),
                });
            }

            fetch(cluster, WorkloadKind::Deployment, namespace, &owner.name, cancel).await
        }
        "StatefulSet" => {
            fetch(
                cluster,
                WorkloadKind::StatefulSet,
                namespace,
                &controller.name,
                cancel,
            )
            .await
        }
        _ => Err(Error::UnsupportedOwner {
            owned: format!("Pod {pod_name}"),
            kind: controller.kind.clone(),
            api_version: controller.api_version.clone(),
            name: controller.name.clone(),
        }),
    }
}

/// Parent kind and name recorded on a replacement pod, if both are present
pub fn parent_markers(pod: &Pod) -> Option<(&str, &str)> {
    let annotations = pod.metadata.annotations.as_ref()?;
    let kind = annotations
        .get(PARENT_KIND_ANNOTATION)
        .filter(|v| !v.is_empty())?;
    let name = annotations
        .get(PARENT_NAME_ANNOTATION)
        .filter(|v| !v.is_empty())?;
    Some((kind, name))
}

/// Load the workload a replacement pod was cut from, using its markers
pub async fn parent_from_replaced(
    cluster: &dyn ClusterApi,
    pod: &Pod,
    cancel: &CancellationToken,
) -> Result<Workload> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let (kind, name) = parent_markers(pod).ok_or_else(|| Error::MissingMarkers {
        namespace: namespace.to_string(),
        name: pod.metadata.name.clone().unwrap_or_default(),
    })?;

    fetch(cluster, kind.parse()?, namespace, name, cancel).await
}
