//! Common test utilities for replacement engine tests
//!
//! Provides an in-memory cluster that records every mutating call and plays
//! the part of the workload controllers: patching a workload's replica count
//! creates or terminates the pods it owns.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, ReplicaSet, ReplicaSetSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use pod_replacer::{ClusterApi, EngineConfig, Error, Result, Workload, WorkloadKind};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "dev";

/// Mutating call observed by the fake cluster
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreatePod(String),
    DeletePod(String),
    PatchWorkload {
        kind: WorkloadKind,
        name: String,
        patch: Value,
    },
}

type PodKey = (String, String);
type WorkloadKey = (&'static str, String, String);

#[derive(Default)]
struct State {
    pods: BTreeMap<PodKey, Pod>,
    workloads: BTreeMap<WorkloadKey, Workload>,
    /// Terminating pods and how many more `get_pod` reads they survive
    terminating: BTreeMap<PodKey, u32>,
    calls: Vec<Call>,
    next_pod: u32,
    /// Upcoming `create_pod` calls that fail before touching anything
    failing_creates: u32,
    /// Upcoming `patch_workload` calls that fail before touching anything
    failing_patches: u32,
}

/// In-memory cluster implementing [`ClusterApi`]
pub struct FakeCluster {
    state: Mutex<State>,
    terminating_reads: u32,
}

impl FakeCluster {
    /// Cluster where deleted pods disappear immediately
    pub fn new() -> Arc<Self> {
        Self::with_graceful_deletion(0)
    }

    /// Cluster where deleted pods stay visible with a deletion timestamp for
    /// `reads` pod reads before they disappear
    pub fn with_graceful_deletion(reads: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            terminating_reads: reads,
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Make the next `count` pod creations fail
    pub fn fail_creates(&self, count: u32) {
        self.state.lock().unwrap().failing_creates = count;
    }

    /// Make the next `count` workload patches fail
    pub fn fail_patches(&self, count: u32) {
        self.state.lock().unwrap().failing_patches = count;
    }

    pub fn patch_calls(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PatchWorkload { patch, .. } => Some(patch),
                _ => None,
            })
            .collect()
    }

    /// Pod as stored, without counting as a read
    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(&(NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .pods
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn workload(&self, kind: WorkloadKind, name: &str) -> Workload {
        self.state.lock().unwrap().workloads[&(kind.as_str(), NAMESPACE.to_string(), name.to_string())]
            .clone()
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap(),
            pod.metadata.name.clone().unwrap(),
        );
        self.state.lock().unwrap().pods.insert(key, pod);
    }

    pub fn add_workload(&self, workload: Workload) {
        let mut state = self.state.lock().unwrap();
        let key = workload_key(&workload);
        state.workloads.insert(key.clone(), workload);
        self.reconcile(&mut state, &key);
    }

    pub fn remove_workload(&self, kind: WorkloadKind, name: &str) {
        self.state
            .lock()
            .unwrap()
            .workloads
            .remove(&(kind.as_str(), NAMESPACE.to_string(), name.to_string()));
    }

    /// Deployment `name` with ReplicaSet `{name}-7d9f5` and `replicas` pods
    pub fn add_deployment(&self, name: &str, replicas: i32, containers: Vec<Container>) {
        self.add_workload(Workload::Deployment(Deployment {
            metadata: meta(name, None),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: template(name, containers.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }));
        self.add_workload(Workload::ReplicaSet(ReplicaSet {
            metadata: meta(
                &format!("{name}-7d9f5"),
                Some(owner_reference("Deployment", name)),
            ),
            spec: Some(ReplicaSetSpec {
                replicas: Some(replicas),
                template: Some(template(name, containers)),
                ..Default::default()
            }),
            ..Default::default()
        }));
    }

    pub fn add_replica_set(
        &self,
        name: &str,
        replicas: i32,
        containers: Vec<Container>,
        owner: Option<OwnerReference>,
    ) {
        self.add_workload(Workload::ReplicaSet(ReplicaSet {
            metadata: meta(name, owner),
            spec: Some(ReplicaSetSpec {
                replicas: Some(replicas),
                template: Some(template(name, containers)),
                ..Default::default()
            }),
            ..Default::default()
        }));
    }

    pub fn add_statefulset(&self, name: &str, replicas: i32, containers: Vec<Container>) {
        self.add_workload(Workload::StatefulSet(StatefulSet {
            metadata: meta(name, None),
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                template: template(name, containers),
                ..Default::default()
            }),
            ..Default::default()
        }));
    }

    fn terminate(&self, state: &mut State, key: &PodKey) {
        if state.terminating.contains_key(key) {
            return;
        }
        if self.terminating_reads == 0 {
            state.pods.remove(key);
            return;
        }
        if let Some(pod) = state.pods.get_mut(key) {
            let mut value = serde_json::to_value(&*pod).unwrap();
            value["metadata"]["deletionTimestamp"] = json!("2026-10-19T12:00:00Z");
            *pod = serde_json::from_value(value).unwrap();
            state.terminating.insert(key.clone(), self.terminating_reads);
        }
    }

    /// Play the workload controller: converge owned pods on the replica count
    fn reconcile(&self, state: &mut State, key: &WorkloadKey) {
        let workload = state.workloads[key].clone();
        let (pod_owner_kind, pod_owner_name) = match &workload {
            Workload::Deployment(_) => {
                let replica_set = state.workloads.values().find(|w| {
                    w.kind() == WorkloadKind::ReplicaSet
                        && controller_name(w.metadata()) == Some(workload.name())
                });
                match replica_set {
                    Some(rs) => ("ReplicaSet", rs.name().to_string()),
                    None => return,
                }
            }
            Workload::ReplicaSet(rs) => {
                // ReplicaSets of a known Deployment follow the Deployment's replicas
                if let Some(owner) = controller_name(&rs.metadata) {
                    let deployment = ("Deployment", key.1.clone(), owner.to_string());
                    if state.workloads.contains_key(&deployment) {
                        self.reconcile(state, &deployment);
                        return;
                    }
                }
                ("ReplicaSet", workload.name().to_string())
            }
            Workload::StatefulSet(_) => ("StatefulSet", workload.name().to_string()),
        };

        let desired = usize::try_from(workload.replicas().unwrap_or(1)).unwrap();
        let owned = state
            .pods
            .iter()
            .filter(|(k, pod)| {
                k.0 == key.1
                    && !state.terminating.contains_key(*k)
                    && pod.metadata.owner_references.as_ref().is_some_and(|refs| {
                        refs.iter()
                            .any(|r| r.kind == pod_owner_kind && r.name == pod_owner_name)
                    })
            })
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();

        for extra in owned.iter().skip(desired).rev() {
            self.terminate(state, extra);
        }

        let template = workload.template().cloned().unwrap_or_default();
        for _ in owned.len()..desired {
            let name = if workload.kind() == WorkloadKind::StatefulSet {
                (0..)
                    .map(|ordinal| format!("{pod_owner_name}-{ordinal}"))
                    .find(|name| !state.pods.contains_key(&(key.1.clone(), name.clone())))
                    .unwrap()
            } else {
                state.next_pod += 1;
                format!("{pod_owner_name}-x{:04}", state.next_pod)
            };

            let mut labels = template
                .metadata
                .as_ref()
                .and_then(|m| m.labels.clone())
                .unwrap_or_default();
            if workload.kind() == WorkloadKind::StatefulSet {
                labels.insert("controller-revision-hash".to_string(), format!("{pod_owner_name}-6c5b"));
                labels.insert("statefulset.kubernetes.io/pod-name".to_string(), name.clone());
            } else {
                labels.insert("pod-template-hash".to_string(), "7d9f5".to_string());
            }

            let pod = Pod {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(key.1.clone()),
                    labels: Some(labels),
                    owner_references: Some(vec![owner_reference(pod_owner_kind, &pod_owner_name)]),
                    ..Default::default()
                },
                spec: template.spec.clone(),
                status: None,
            };
            state.pods.insert((key.1.clone(), name), pod);
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        match state.terminating.get(&key).copied() {
            Some(0) => {
                state.terminating.remove(&key);
                state.pods.remove(&key);
                return Ok(None);
            }
            Some(remaining) => {
                state.terminating.insert(key.clone(), remaining - 1);
            }
            None => {}
        }
        Ok(state.pods.get(&key).cloned())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && selector_matches(pod, label_selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.lock().unwrap();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let key = (namespace, name.clone());
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(Error::cluster("the server is currently unable to handle the request"));
        }
        if state.pods.contains_key(&key) {
            return Err(Error::cluster(format!("pods \"{name}\" already exists")));
        }
        state.calls.push(Call::CreatePod(name));
        state.pods.insert(key, pod.clone());
        Ok(pod.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        if !state.pods.contains_key(&key) {
            return Ok(false);
        }
        state.calls.push(Call::DeletePod(name.to_string()));
        self.terminate(&mut state, &key);
        Ok(true)
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .workloads
            .get(&(kind.as_str(), namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (kind.as_str(), namespace.to_string(), name.to_string());
        if state.failing_patches > 0 {
            state.failing_patches -= 1;
            return Err(Error::cluster("the server is currently unable to handle the request"));
        }
        let Some(current) = state.workloads.get(&key) else {
            return Err(Error::cluster(format!("{kind} {namespace}/{name} not found")));
        };

        let mut value = current.to_value()?;
        json_patch::merge(&mut value, patch);
        let updated = match kind {
            WorkloadKind::ReplicaSet => Workload::ReplicaSet(serde_json::from_value(value)?),
            WorkloadKind::Deployment => Workload::Deployment(serde_json::from_value(value)?),
            WorkloadKind::StatefulSet => Workload::StatefulSet(serde_json::from_value(value)?),
        };

        state.calls.push(Call::PatchWorkload {
            kind,
            name: name.to_string(),
            patch: patch.clone(),
        });
        state.workloads.insert(key.clone(), updated);
        self.reconcile(&mut state, &key);
        Ok(())
    }
}

fn workload_key(workload: &Workload) -> WorkloadKey {
    (
        workload.kind().as_str(),
        workload.namespace().to_string(),
        workload.name().to_string(),
    )
}

fn controller_name(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
        .map(|r| r.name.as_str())
}

/// Equality (`k=v`) and absence (`!k`) terms joined by commas
fn selector_matches(pod: &Pod, selector: &str) -> bool {
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.strip_prefix('!') {
            Some(key) => !labels.contains_key(key),
            None => term
                .split_once('=')
                .is_some_and(|(k, v)| labels.get(k).is_some_and(|l| l == v)),
        })
}

pub fn owner_reference(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{name}-uid"),
        controller: Some(true),
        ..Default::default()
    }
}

pub fn meta(name: &str, owner: Option<OwnerReference>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        owner_references: owner.map(|o| vec![o]),
        ..Default::default()
    }
}

pub fn template(app: &str, containers: Vec<Container>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            ..Default::default()
        }),
    }
}

pub fn container(name: &str, image: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        ..Default::default()
    }
}

pub fn labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

pub fn config() -> EngineConfig {
    EngineConfig::default()
}
