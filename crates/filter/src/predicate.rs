//! Admission predicates for the two watched kinds.

use importstatus_core::{has_crds_suffix, has_klusterlet_suffix, is_default_mode, ManagedCluster, WatchEvent, WorkObject};
use tracing::trace;

/// Decides whether an event is significant enough to reconcile.
///
/// Implementations are stateless: they only look at the snapshots borrowed for
/// the call.
pub trait EventFilter<T>: Send + Sync {
    fn admit(&self, event: &WatchEvent<T>) -> bool;
}

/// Admits ManagedCluster events while the cluster is in Default deploy mode.
///
/// Updates look at the new object only, so a cluster moving into Hosted mode
/// is not reconciled for that transition while one leaving it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterModeFilter;

impl EventFilter<ManagedCluster> for ClusterModeFilter {
    fn admit(&self, event: &WatchEvent<ManagedCluster>) -> bool {
        is_default_mode(event.object().metadata.annotations.as_ref())
    }
}

/// Admits klusterlet ManifestWork events when their status conditions change.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionChangeFilter;

impl EventFilter<WorkObject> for ConditionChangeFilter {
    fn admit(&self, event: &WatchEvent<WorkObject>) -> bool {
        match event {
            WatchEvent::Create(_) | WatchEvent::Delete(_) => true,
            WatchEvent::Generic(_) => false,
            WatchEvent::Update { old, new } => {
                let name = new.name();
                if !has_crds_suffix(name) && !has_klusterlet_suffix(name) {
                    trace!(work = %name, "not a klusterlet work");
                    return false;
                }
                match (old.as_work(), new.as_work()) {
                    (Some(old), Some(new)) => conditions_changed(old.conditions(), new.conditions()),
                    _ => {
                        trace!(work = %name, "update snapshot is not a ManifestWork");
                        false
                    }
                }
            }
        }
    }
}

/// Whole-sequence comparison: element order and every field count.
pub fn conditions_changed<C: PartialEq>(old: &[C], new: &[C]) -> bool {
    old != new
}
