//! # Cluster API
//!
//! The seam between the replacement engine and the Kubernetes API server.
//!
//! The engine only talks to the cluster through [`ClusterApi`], which keeps
//! every algorithm testable against an in-memory cluster. [`KubeClusterApi`]
//! is the production implementation on top of kube-rs.

use crate::error::Result;
use crate::workload::{Workload, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

/// Cluster operations needed by the replacement engine
///
/// "Not found" is not an error at this level: getters return `None` and
/// `delete_pod` returns `false` when the object is already gone.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a pod by namespace and name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// List pods in a namespace matching a label selector (`k=v,k2=v2`)
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    /// Create a pod and return the stored object
    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    /// Delete a pod, returning `false` if it did not exist
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Get a workload of the given kind
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>>;

    /// Apply a JSON merge patch to a workload
    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()>;
}

/// kube-rs backed cluster access
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl std::fmt::Debug for KubeClusterApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterApi").finish_non_exhaustive()
    }
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn not_found<T>(result: kube::Result<T>) -> kube::Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.pods(namespace).get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        Ok(self.pods(namespace).list(&params).await?.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        Ok(self
            .pods(namespace)
            .create(&PostParams::default(), pod)
            .await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool> {
        let deleted = not_found(
            self.pods(namespace)
                .delete(name, &DeleteParams::default())
                .await,
        )?;
        debug!(
            namespace,
            name,
            existed = deleted.is_some(),
            "Deleted pod"
        );
        Ok(deleted.is_some())
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>> {
        let client = self.client.clone();
        let workload = match kind {
            WorkloadKind::ReplicaSet => Api::<ReplicaSet>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::ReplicaSet),
            WorkloadKind::Deployment => Api::<Deployment>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::Deployment),
            WorkloadKind::StatefulSet => Api::<StatefulSet>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::StatefulSet),
        };
        Ok(workload)
    }

    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        let client = self.client.clone();
        let params = PatchParams::default();
        let patch = Patch::Merge(patch);
        match kind {
            WorkloadKind::ReplicaSet => {
                Api::<ReplicaSet>::namespaced(client, namespace)
                    .patch(name, &params, &patch)
                    .await?;
            }
            WorkloadKind::Deployment => {
                Api::<Deployment>::namespaced(client, namespace)
                    .patch(name, &params, &patch)
                    .await?;
            }
            WorkloadKind::StatefulSet => {
                Api::<StatefulSet>::namespaced(client, namespace)
                    .patch(name, &params, &patch)
                    .await?;
            }
        }
        Ok(())
    }
}
