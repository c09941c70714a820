//! # Scale Tests
//!
//! Quiesce and restore semantics of the replicas annotation.

mod common;

use common::{container, meta, template, Call, FakeCluster};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use pod_replacer::constants::REPLICAS_ANNOTATION;
use pod_replacer::replacer::scale::{quiesce, restore};
use pod_replacer::{Error, Workload, WorkloadKind};
use serde_json::json;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

fn deployment(replicas: Option<i32>, annotations: &[(&str, &str)]) -> Workload {
    let mut metadata = meta("api", None);
    if !annotations.is_empty() {
        metadata.annotations = Some(
            annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
    }
    Workload::Deployment(Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas,
            template: template("api", vec![container("api", "team/api:1")]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_quiesce_records_replicas() {
    let cluster = FakeCluster::new();
    cluster.add_workload(deployment(Some(4), &[("team", "payments")]));
    let cancel = CancellationToken::new();

    let workload = cluster.workload(WorkloadKind::Deployment, "api");
    assert!(quiesce(&*cluster, &workload, &cancel).await.unwrap());

    assert_eq!(
        cluster.calls(),
        vec![Call::PatchWorkload {
            kind: WorkloadKind::Deployment,
            name: "api".to_string(),
            patch: json!({
                "metadata": {"annotations": {"devspace.sh/replicas": "4"}},
                "spec": {"replicas": 0}
            }),
        }]
    );
    let quiesced = cluster.workload(WorkloadKind::Deployment, "api");
    assert_eq!(quiesced.replicas(), Some(0));
    assert_eq!(quiesced.annotation(REPLICAS_ANNOTATION), Some("4"));
    assert_eq!(quiesced.annotation("team"), Some("payments"));
}

#[tokio::test]
async fn test_quiesce_defaults_unset_replicas_to_one() {
    let cluster = FakeCluster::new();
    cluster.add_workload(deployment(None, &[]));
    let cancel = CancellationToken::new();

    let workload = cluster.workload(WorkloadKind::Deployment, "api");
    quiesce(&*cluster, &workload, &cancel).await.unwrap();

    let quiesced = cluster.workload(WorkloadKind::Deployment, "api");
    assert_eq!(quiesced.annotation(REPLICAS_ANNOTATION), Some("1"));
    assert_eq!(quiesced.replicas(), Some(0));
}

#[tokio::test]
async fn test_quiesce_keeps_existing_record() {
    let cluster = FakeCluster::new();
    cluster.add_workload(deployment(Some(0), &[(REPLICAS_ANNOTATION, "5")]));
    let cancel = CancellationToken::new();

    let workload = cluster.workload(WorkloadKind::Deployment, "api");
    assert!(!quiesce(&*cluster, &workload, &cancel).await.unwrap());

    assert!(cluster.calls().is_empty());
    assert_eq!(
        cluster
            .workload(WorkloadKind::Deployment, "api")
            .annotation(REPLICAS_ANNOTATION),
        Some("5")
    );
}

#[tokio::test]
async fn test_restore_round_trip() {
    let cluster = FakeCluster::new();
    cluster.add_workload(deployment(Some(3), &[]));
    let cancel = CancellationToken::new();

    let workload = cluster.workload(WorkloadKind::Deployment, "api");
    quiesce(&*cluster, &workload, &cancel).await.unwrap();
    let quiesced = cluster.workload(WorkloadKind::Deployment, "api");
    assert!(restore(&*cluster, &quiesced, &cancel).await.unwrap());

    let restored = cluster.workload(WorkloadKind::Deployment, "api");
    assert_eq!(restored.replicas(), Some(3));
    assert_eq!(restored.annotation(REPLICAS_ANNOTATION), None);
}

#[tokio::test]
async fn test_restore_without_record_is_a_no_op() {
    let cluster = FakeCluster::new();
    cluster.add_workload(deployment(Some(2), &[]));
    let cancel = CancellationToken::new();

    let workload = cluster.workload(WorkloadKind::Deployment, "api");
    assert!(!restore(&*cluster, &workload, &cancel).await.unwrap());
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_restore_zero_only_clears_record() {
    let cluster = FakeCluster::new();
    cluster.add_workload(deployment(Some(0), &[(REPLICAS_ANNOTATION, "0")]));
    let cancel = CancellationToken::new();

    let workload = cluster.workload(WorkloadKind::Deployment, "api");
    restore(&*cluster, &workload, &cancel).await.unwrap();

    assert_eq!(
        cluster.patch_calls(),
        vec![json!({"metadata": {"annotations": {"devspace.sh/replicas": null}}})]
    );
    let restored = cluster.workload(WorkloadKind::Deployment, "api");
    assert_eq!(restored.replicas(), Some(0));
    assert_eq!(restored.annotation(REPLICAS_ANNOTATION), None);
}

#[tokio::test]
async fn test_restore_rejects_garbage_record() {
    let cluster = FakeCluster::new();
    cluster.add_workload(deployment(Some(0), &[(REPLICAS_ANNOTATION, "three")]));
    let cancel = CancellationToken::new();

    let workload = cluster.workload(WorkloadKind::Deployment, "api");
    let err = restore(&*cluster, &workload, &cancel).await.unwrap_err();

    assert!(matches!(err, Error::Serialization(_)));
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_quiesce_sends_nothing() {
    let cluster = FakeCluster::new();
    cluster.add_workload(deployment(Some(2), &[]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let workload = cluster.workload(WorkloadKind::Deployment, "api");
    let err = quiesce(&*cluster, &workload, &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(cluster.calls().is_empty());
}
