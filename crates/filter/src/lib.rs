//! Import-status event filtering: which ManagedCluster and klusterlet
//! ManifestWork changes are worth a reconcile, and under which cluster key.

#![forbid(unsafe_code)]

pub mod dispatch;
pub mod mapper;
pub mod predicate;

use importstatus_core::{ManagedCluster, WorkObject};

pub use dispatch::{Enqueue, Outcome, Pipeline};
pub use mapper::{EnqueueForObject, EnqueueForOwningCluster, KeyMapper};
pub use predicate::{conditions_changed, ClusterModeFilter, ConditionChangeFilter, EventFilter};

pub type ClusterPipeline = Pipeline<ManagedCluster, ClusterModeFilter, EnqueueForObject>;
pub type WorkPipeline = Pipeline<WorkObject, ConditionChangeFilter, EnqueueForOwningCluster>;

/// ManagedCluster source: default-mode clusters, keyed by their own name.
pub fn cluster_pipeline() -> ClusterPipeline {
    Pipeline::new("managedcluster", ClusterModeFilter, EnqueueForObject)
}

/// Klusterlet work source: condition changes, keyed by the owning cluster.
pub fn work_pipeline() -> WorkPipeline {
    Pipeline::new("manifestwork", ConditionChangeFilter, EnqueueForOwningCluster)
}
