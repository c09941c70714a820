//! Pod Replacer Library
//!
//! Development-mode pod replacement for Kubernetes: swap a pod managed by a
//! Deployment, ReplicaSet or StatefulSet for a modified copy while its
//! controller is scaled to zero, and undo the swap later.
//!
//! The entry point is [`PodReplacer`]. Cluster access, target selection,
//! image resolution and patch application sit behind traits so the engine
//! runs unchanged against a real API server or an in-memory cluster.

pub mod cluster;
pub mod config;
pub mod constants;
pub mod error;
pub mod image;
pub mod patch;
pub mod poll;
pub mod replacer;
pub mod selector;
pub mod spec;
pub mod workload;

pub use cluster::{ClusterApi, KubeClusterApi};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use image::{ConfigImageResolver, ImageResolver};
pub use patch::{JsonPatchApplier, PatchApplier};
pub use replacer::{PodReplacer, ReplaceOutcome};
pub use selector::{KubeTargetSelector, SelectedPodContainer, TargetSelector};
pub use spec::{PatchConfig, PatchOp, ReplacementSpec};
pub use workload::{Workload, WorkloadKind};
