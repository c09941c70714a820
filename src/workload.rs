//! # Workloads
//!
//! The three controller kinds a replacement pod can be cut from, behind one
//! closed enum. Engine algorithms only use the capability methods on
//! [`Workload`]; the controller resolver is the only place that produces a
//! concrete variant.

use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag of a workload variant, as stored in the parent-kind annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    ReplicaSet,
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReplicaSet => "ReplicaSet",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
        }
    }

    /// StatefulSet pods keep their ordinal identity, so a replacement may
    /// only be created once the original is fully gone
    pub fn requires_full_termination(self) -> bool {
        matches!(self, Self::StatefulSet)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ReplicaSet" => Ok(Self::ReplicaSet),
            "Deployment" => Ok(Self::Deployment),
            "StatefulSet" => Ok(Self::StatefulSet),
            other => Err(Error::UnsupportedOwner {
                owned: "replaced pod".to_string(),
                kind: other.to_string(),
                api_version: String::new(),
                name: String::new(),
            }),
        }
    }
}

/// A workload that owns pods through a template and a replica count
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    ReplicaSet(ReplicaSet),
    Deployment(Deployment),
    StatefulSet(StatefulSet),
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::ReplicaSet(rs) => &rs.metadata,
            Self::Deployment(d) => &d.metadata,
            Self::StatefulSet(sts) => &sts.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::ReplicaSet(rs) => &mut rs.metadata,
            Self::Deployment(d) => &mut d.metadata,
            Self::StatefulSet(sts) => &mut sts.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// `kind namespace/name`, for logs and error messages
    pub fn identity(&self) -> String {
        format!("{} {}/{}", self.kind(), self.namespace(), self.name())
    }

    /// Desired replica count as stored on the object (`None` when unset)
    pub fn replicas(&self) -> Option<i32> {
        match self {
            Self::ReplicaSet(rs) => rs.spec.as_ref().and_then(|s| s.replicas),
            Self::Deployment(d) => d.spec.as_ref().and_then(|s| s.replicas),
            Self::StatefulSet(sts) => sts.spec.as_ref().and_then(|s| s.replicas),
        }
    }

    pub fn set_replicas(&mut self, replicas: i32) {
        match self {
            Self::ReplicaSet(rs) => rs.spec.get_or_insert_with(Default::default).replicas = Some(replicas),
            Self::Deployment(d) => d.spec.get_or_insert_with(Default::default).replicas = Some(replicas),
            Self::StatefulSet(sts) => sts.spec.get_or_insert_with(Default::default).replicas = Some(replicas),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.metadata_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
    }

    /// Pod template the workload stamps its pods from
    pub fn template(&self) -> Option<&PodTemplateSpec> {
        match self {
            Self::ReplicaSet(rs) => rs.spec.as_ref().and_then(|s| s.template.as_ref()),
            Self::Deployment(d) => d.spec.as_ref().map(|s| &s.template),
            Self::StatefulSet(sts) => sts.spec.as_ref().map(|s| &s.template),
        }
    }

    /// Serialize the full object, used to compute merge patches
    pub fn to_value(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::ReplicaSet(rs) => serde_json::to_value(rs)?,
            Self::Deployment(d) => serde_json::to_value(d)?,
            Self::StatefulSet(sts) => serde_json::to_value(sts)?,
        };
        Ok(value)
    }
}
