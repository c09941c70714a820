//! # Errors
//!
//! Error taxonomy of the replacement engine.
//!
//! - Soft "not found" outcomes are never errors; callers see `Ok(None)` or a no-op.
//! - Ambiguity and unsupported ownership abort the operation without retry.
//! - Cluster errors are propagated wrapped with the step that failed.
//! - Timeouts end the current call; re-running the same operation resumes it.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Replacement engine error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The replacement spec does not describe a valid selection
    #[error("invalid replacement spec: {0}")]
    InvalidSpec(String),

    /// The pod is not managed by any controller
    #[error("pod {namespace}/{name} was not created by a ReplicaSet, Deployment or StatefulSet, replacing only works if pod was created by one of those resources")]
    NoOwner { namespace: String, name: String },

    /// The ownership chain ends in a kind the engine cannot scale
    #[error("unrecognized owner of {owned}: {kind} {api_version} {name}")]
    UnsupportedOwner {
        owned: String,
        kind: String,
        api_version: String,
        name: String,
    },

    /// A referenced owner no longer exists
    #[error("owning {kind} {namespace}/{name} not found")]
    OwnerNotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// A replacement pod lacks the parent markers
    #[error("pod {namespace}/{name} carries no parent markers")]
    MissingMarkers { namespace: String, name: String },

    /// More than one container and no container name to choose between them
    #[error("pod spec has {count} containers and containerName is empty")]
    AmbiguousContainer { count: usize },

    /// No container in the pod spec matches the name or image criteria
    #[error("no container in pod spec matches {criteria}")]
    NoMatchingContainer { criteria: String },

    /// The pod spec has no containers at all
    #[error("no containers in pod spec")]
    NoContainers,

    /// The image selector did not resolve to exactly one image
    #[error("unexpected amount of image selectors resolved for {image_name}: {count}")]
    AmbiguousImage { image_name: String, count: usize },

    /// The image resolver failed
    #[error("image resolution failed: {0}")]
    ImageResolution(String),

    /// The selector found no pod to replace
    #[error("no pod found to replace in namespace {namespace}")]
    TargetNotFound { namespace: String },

    /// A bounded poll loop exceeded its deadline
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization, hashing or format conversion failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A user supplied patch could not be applied
    #[error("patch error: {0}")]
    Patch(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cluster error raised by a non kube-rs `ClusterApi` implementation
    #[error("cluster error: {0}")]
    Cluster(String),

    /// An error wrapped with the step it occurred in
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an invalid spec error with the given message
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a cluster error with the given message
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    /// Wrap this error with the name of the step that failed
    #[must_use]
    pub fn context(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping step wrappers
    pub fn root(&self) -> &Error {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the operation was cancelled by the caller
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Whether a bounded wait ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Attach a step name to the error of a `Result`
pub trait ResultExt<T> {
    /// Wrap the error with the given step name
    fn step(self, step: &str) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn step(self, step: &str) -> Result<T> {
        self.map_err(|e| Into::<Error>::into(e).context(step))
    }
}
