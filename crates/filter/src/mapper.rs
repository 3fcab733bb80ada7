//! Translate admitted events into reconcile keys.

use importstatus_core::{derive_cluster_key, ManagedCluster, ReconcileRequest, WatchEvent, WorkObject};

/// Maps an admitted event to at most one reconcile key. `None` means the key
/// cannot be derived and the event must be dropped.
pub trait KeyMapper<T>: Send + Sync {
    fn map(&self, event: &WatchEvent<T>) -> Option<ReconcileRequest>;
}

/// Keys a ManagedCluster event by the cluster's own name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueForObject;

impl KeyMapper<ManagedCluster> for EnqueueForObject {
    fn map(&self, event: &WatchEvent<ManagedCluster>) -> Option<ReconcileRequest> {
        let name = match event {
            WatchEvent::Update { old, new } => new.name().or_else(|| old.name()),
            other => other.object().name(),
        };
        name.map(ReconcileRequest::new)
    }
}

/// Keys a klusterlet work event by the cluster named in the work's name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueForOwningCluster;

impl KeyMapper<WorkObject> for EnqueueForOwningCluster {
    fn map(&self, event: &WatchEvent<WorkObject>) -> Option<ReconcileRequest> {
        let key = match event {
            WatchEvent::Update { old, new } => derive_cluster_key(new.name()).or_else(|| derive_cluster_key(old.name())),
            other => derive_cluster_key(other.object().name()),
        };
        key.map(ReconcileRequest::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn cluster(name: Option<&str>) -> ManagedCluster {
        ManagedCluster { metadata: ObjectMeta { name: name.map(str::to_string), ..Default::default() }, spec: None }
    }

    fn work(name: &str) -> WorkObject {
        WorkObject::Foreign { name: name.into(), kind: None }
    }

    #[test]
    fn cluster_key_is_own_name() {
        let m = EnqueueForObject;
        assert_eq!(m.map(&WatchEvent::Create(cluster(Some("c1")))), Some(ReconcileRequest::new("c1")));
        assert_eq!(m.map(&WatchEvent::Delete(cluster(None))), None);
        let ev = WatchEvent::Update { old: cluster(Some("c1")), new: cluster(Some("c2")) };
        assert_eq!(m.map(&ev), Some(ReconcileRequest::new("c2")));
    }

    #[test]
    fn work_key_is_owning_cluster() {
        let m = EnqueueForOwningCluster;
        assert_eq!(m.map(&WatchEvent::Create(work("c1-klusterlet"))), Some(ReconcileRequest::new("c1")));
        assert_eq!(m.map(&WatchEvent::Delete(work("c1-klusterlet-crds"))), Some(ReconcileRequest::new("c1")));
        assert_eq!(m.map(&WatchEvent::Create(work("unrelated-object"))), None);
        assert_eq!(m.map(&WatchEvent::Create(work("klusterlet"))), None);
    }
}
