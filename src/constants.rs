//! # Constants
//!
//! Marker keys stamped on replacement pods and quiesced workloads, plus the
//! default timeouts used by the replacement engine.
//!
//! The marker keys are the only state the engine persists. Operators and
//! monitoring tools can rely on them to detect an active replacement or a
//! workload that is scaled down by this tool.

/// Kind of the workload a replacement pod was cut from
pub const PARENT_KIND_ANNOTATION: &str = "devspace.sh/parent-kind";

/// Name of the workload a replacement pod was cut from
pub const PARENT_NAME_ANNOTATION: &str = "devspace.sh/parent-name";

/// Fingerprint of the parent's pod template after image substitution
pub const PARENT_HASH_ANNOTATION: &str = "devspace.sh/parent-hash";

/// Fingerprint of the replacement configuration
pub const REPLACE_CONFIG_HASH_ANNOTATION: &str = "devspace.sh/config-hash";

/// Replica count recorded on a workload before it was scaled to zero
pub const REPLICAS_ANNOTATION: &str = "devspace.sh/replicas";

/// Label marking a pod as a replacement managed by this engine
pub const REPLACED_LABEL: &str = "devspace.sh/replaced";

/// Label carrying the image name a replacement was selected by
pub const IMAGE_NAME_LABEL: &str = "devspace.sh/imageName";

/// Container inside the replacement pod that matched the selection criteria
pub const MATCHED_CONTAINER_ANNOTATION: &str = "devspace.sh/container";

/// Suffix appended to the original pod name
pub const REPLACED_POD_SUFFIX: &str = "devspace";

/// Labels inserted by workload controllers that must not leak onto a replacement
pub const CONTROLLER_LABELS: [&str; 3] = [
    "pod-template-hash",
    "controller-revision-hash",
    "statefulset.kubernetes.io/pod-name",
];

/// Maximum length of a pod name
pub const MAX_NAME_LENGTH: usize = 63;

/// Default timeout when looking for an existing replacement during `replace`
pub const DEFAULT_FIND_REPLACED_TIMEOUT_SECS: u64 = 2;

/// Default timeout when looking for an existing replacement during `revert`
pub const DEFAULT_REVERT_FIND_TIMEOUT_SECS: u64 = 4;

/// Default timeout for selecting a fresh target pod
pub const DEFAULT_SELECT_TIMEOUT_SECS: u64 = 300;

/// Default timeout for pods to terminate after delete or scale down
pub const DEFAULT_TERMINATION_TIMEOUT_SECS: u64 = 120;

/// Poll interval while waiting for a deleted replacement to disappear
pub const DEFAULT_DELETE_POLL_INTERVAL_MS: u64 = 1000;

/// Poll interval while waiting for the original pod to terminate
pub const DEFAULT_TERMINATION_POLL_INTERVAL_MS: u64 = 2000;

/// Poll interval of the target selector's wait strategy
pub const DEFAULT_SELECT_POLL_INTERVAL_MS: u64 = 2000;

/// Namespace used when neither the replacement spec nor the CLI names one
pub const DEFAULT_NAMESPACE: &str = "default";
