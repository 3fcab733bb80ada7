//! Import-status core types: watched snapshots, watch events and reconcile keys.

#![forbid(unsafe_code)]

pub mod mode;
pub mod naming;

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mode::{is_default_mode, DeployMode};
pub use naming::{derive_cluster_key, has_crds_suffix, has_klusterlet_suffix};

/// GVK key of the primary resource (cluster scoped).
pub const MANAGED_CLUSTER_GVK: &str = "cluster.open-cluster-management.io/v1/ManagedCluster";
/// GVK key of the per-cluster work resource (namespaced).
pub const MANIFEST_WORK_GVK: &str = "work.open-cluster-management.io/v1/ManifestWork";

pub const MANAGED_CLUSTER_KIND: &str = "ManagedCluster";
pub const MANIFEST_WORK_KIND: &str = "ManifestWork";

/// Event category delivered by a watch source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Create,
    Update,
    Delete,
    Generic,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Create => "create",
            EventCategory::Update => "update",
            EventCategory::Delete => "delete",
            EventCategory::Generic => "generic",
        }
    }
}

/// A change notification carrying immutable snapshots of the object.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Create(T),
    Update { old: T, new: T },
    Delete(T),
    Generic(T),
}

impl<T> WatchEvent<T> {
    pub fn category(&self) -> EventCategory {
        match self {
            WatchEvent::Create(_) => EventCategory::Create,
            WatchEvent::Update { .. } => EventCategory::Update,
            WatchEvent::Delete(_) => EventCategory::Delete,
            WatchEvent::Generic(_) => EventCategory::Generic,
        }
    }

    /// The current object: the new snapshot for updates, the only snapshot otherwise.
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Create(o) | WatchEvent::Delete(o) | WatchEvent::Generic(o) => o,
            WatchEvent::Update { new, .. } => new,
        }
    }

    /// Convert both snapshots, failing the whole event if either conversion fails.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<WatchEvent<U>, E> {
        Ok(match self {
            WatchEvent::Create(o) => WatchEvent::Create(f(o)?),
            WatchEvent::Update { old, new } => WatchEvent::Update { old: f(old)?, new: f(new)? },
            WatchEvent::Delete(o) => WatchEvent::Delete(f(o)?),
            WatchEvent::Generic(o) => WatchEvent::Generic(f(o)?),
        })
    }
}

/// Key handed to the reconcile queue: the name of a ManagedCluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("object has no metadata.name")]
    MissingName,
    #[error("decoding {kind}: {source}")]
    Invalid {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode a raw watch payload into a typed snapshot.
pub trait FromRaw: Sized {
    fn from_raw(raw: serde_json::Value) -> Result<Self, DecodeError>;
}

fn raw_name(raw: &serde_json::Value) -> Option<&str> {
    raw.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
        .filter(|n| !n.is_empty())
}

fn raw_kind(raw: &serde_json::Value) -> Option<&str> {
    raw.get("kind").and_then(|k| k.as_str())
}

/// A registered member cluster. Only metadata matters to the filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManagedCluster {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
}

impl ManagedCluster {
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref().filter(|n| !n.is_empty())
    }

    pub fn deploy_mode(&self) -> DeployMode {
        DeployMode::of(self.metadata.annotations.as_ref())
    }
}

impl FromRaw for ManagedCluster {
    fn from_raw(raw: serde_json::Value) -> Result<Self, DecodeError> {
        if raw_name(&raw).is_none() {
            return Err(DecodeError::MissingName);
        }
        serde_json::from_value(raw).map_err(|source| DecodeError::Invalid { kind: MANAGED_CLUSTER_KIND, source })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManifestWorkStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A bundle of manifests deployed to one cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManifestWork {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ManifestWorkStatus>,
}

impl ManifestWork {
    /// Status conditions in reported order. A missing status reads as no conditions.
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }
}

/// Snapshot delivered by the work watch. Anything that does not decode as a
/// ManifestWork is kept as `Foreign` so it can still be named.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkObject {
    Work(ManifestWork),
    Foreign { name: String, kind: Option<String> },
}

impl WorkObject {
    pub fn name(&self) -> &str {
        match self {
            WorkObject::Work(w) => w.metadata.name.as_deref().unwrap_or_default(),
            WorkObject::Foreign { name, .. } => name,
        }
    }

    pub fn as_work(&self) -> Option<&ManifestWork> {
        match self {
            WorkObject::Work(w) => Some(w),
            WorkObject::Foreign { .. } => None,
        }
    }
}

impl From<ManifestWork> for WorkObject {
    fn from(w: ManifestWork) -> Self {
        WorkObject::Work(w)
    }
}

impl FromRaw for WorkObject {
    fn from_raw(raw: serde_json::Value) -> Result<Self, DecodeError> {
        let name = raw_name(&raw).ok_or(DecodeError::MissingName)?.to_string();
        let kind = raw_kind(&raw).map(str::to_string);
        if kind.as_deref().is_some_and(|k| k != MANIFEST_WORK_KIND) {
            return Ok(WorkObject::Foreign { name, kind });
        }
        match serde_json::from_value::<ManifestWork>(raw) {
            Ok(w) => Ok(WorkObject::Work(w)),
            Err(_) => Ok(WorkObject::Foreign { name, kind }),
        }
    }
}

pub mod prelude {
    pub use super::{
        DecodeError, EventCategory, FromRaw, ManagedCluster, ManifestWork, ManifestWorkStatus, ReconcileRequest,
        WatchEvent, WorkObject,
    };
}
