#![forbid(unsafe_code)]

use std::sync::Mutex;

use importstatus_core::{ReconcileRequest, WatchEvent};
use importstatus_filter::{cluster_pipeline, work_pipeline, Outcome};
use serde_json::{json, Value};

fn cluster(name: &str, mode: Option<&str>) -> Value {
    let mut meta = json!({ "name": name });
    if let Some(m) = mode {
        meta["annotations"] = json!({ "import.open-cluster-management.io/klusterlet-deploy-mode": m });
    }
    json!({ "apiVersion": "cluster.open-cluster-management.io/v1", "kind": "ManagedCluster", "metadata": meta })
}

fn cond(t: &str, s: &str) -> Value {
    json!({ "type": t, "status": s, "reason": "Test", "message": "", "lastTransitionTime": "2024-01-01T00:00:00Z" })
}

fn work(name: &str, conditions: Vec<Value>) -> Value {
    json!({
        "apiVersion": "work.open-cluster-management.io/v1",
        "kind": "ManifestWork",
        "metadata": { "name": name, "namespace": "c1" },
        "status": { "conditions": conditions },
    })
}

fn keys(q: &Mutex<Vec<ReconcileRequest>>) -> Vec<String> {
    q.lock().unwrap().iter().map(|r| r.name.clone()).collect()
}

#[test]
fn new_default_cluster_is_enqueued_by_name() {
    let q = Mutex::new(Vec::new());
    let out = cluster_pipeline().handle_raw(WatchEvent::Create(cluster("c1", None)), &q);
    assert_eq!(out, Outcome::Enqueued(ReconcileRequest::new("c1")));
    assert_eq!(keys(&q), vec!["c1"]);
}

#[test]
fn cluster_moving_into_hosted_is_not_enqueued() {
    let q = Mutex::new(Vec::new());
    let ev = WatchEvent::Update { old: cluster("c1", Some("Default")), new: cluster("c1", Some("Hosted")) };
    assert_eq!(cluster_pipeline().handle_raw(ev, &q), Outcome::FilteredOut);
    assert!(keys(&q).is_empty());
}

#[test]
fn cluster_leaving_hosted_is_enqueued() {
    let q = Mutex::new(Vec::new());
    let ev = WatchEvent::Update { old: cluster("c1", Some("hosted")), new: cluster("c1", None) };
    assert!(matches!(cluster_pipeline().handle_raw(ev, &q), Outcome::Enqueued(_)));
    assert_eq!(keys(&q), vec!["c1"]);
}

#[test]
fn unchanged_conditions_are_not_enqueued() {
    let q = Mutex::new(Vec::new());
    let ev = WatchEvent::Update {
        old: work("c1-klusterlet", vec![cond("Available", "True")]),
        new: work("c1-klusterlet", vec![cond("Available", "True")]),
    };
    assert_eq!(work_pipeline().handle_raw(ev, &q), Outcome::FilteredOut);
    assert!(keys(&q).is_empty());
}

#[test]
fn changed_conditions_enqueue_owning_cluster() {
    let q = Mutex::new(Vec::new());
    let ev = WatchEvent::Update {
        old: work("c1-klusterlet", vec![cond("Available", "False")]),
        new: work("c1-klusterlet", vec![cond("Available", "True")]),
    };
    assert_eq!(work_pipeline().handle_raw(ev, &q), Outcome::Enqueued(ReconcileRequest::new("c1")));
    assert_eq!(keys(&q), vec!["c1"]);
}

#[test]
fn crds_work_changes_enqueue_owning_cluster() {
    let q = Mutex::new(Vec::new());
    let ev = WatchEvent::Update {
        old: work("c1-klusterlet-crds", vec![]),
        new: work("c1-klusterlet-crds", vec![cond("Applied", "True")]),
    };
    assert_eq!(work_pipeline().handle_raw(ev, &q), Outcome::Enqueued(ReconcileRequest::new("c1")));
}

#[test]
fn unrelated_work_update_is_rejected() {
    let q = Mutex::new(Vec::new());
    let ev = WatchEvent::Update {
        old: work("unrelated-object", vec![cond("Available", "False")]),
        new: work("unrelated-object", vec![cond("Available", "True")]),
    };
    assert_eq!(work_pipeline().handle_raw(ev, &q), Outcome::FilteredOut);
    assert!(keys(&q).is_empty());
}

#[test]
fn permuted_conditions_are_a_change() {
    let q = Mutex::new(Vec::new());
    let a = cond("Applied", "True");
    let b = cond("Available", "True");
    let ev = WatchEvent::Update {
        old: work("c1-klusterlet", vec![a.clone(), b.clone()]),
        new: work("c1-klusterlet", vec![b, a]),
    };
    assert!(matches!(work_pipeline().handle_raw(ev, &q), Outcome::Enqueued(_)));
}

#[test]
fn message_only_change_is_a_change() {
    let q = Mutex::new(Vec::new());
    let mut changed = cond("Available", "True");
    changed["message"] = json!("all resources available");
    let ev = WatchEvent::Update {
        old: work("c1-klusterlet", vec![cond("Available", "True")]),
        new: work("c1-klusterlet", vec![changed]),
    };
    assert!(matches!(work_pipeline().handle_raw(ev, &q), Outcome::Enqueued(_)));
}

#[test]
fn spec_only_change_is_not_a_change() {
    let q = Mutex::new(Vec::new());
    let old = work("c1-klusterlet", vec![cond("Available", "True")]);
    let mut new = old.clone();
    new["spec"] = json!({ "workload": { "manifests": [] } });
    new["metadata"]["labels"] = json!({ "touched": "yes" });
    assert_eq!(work_pipeline().handle_raw(WatchEvent::Update { old, new }, &q), Outcome::FilteredOut);
}

#[test]
fn non_work_snapshot_fails_type_guard() {
    let q = Mutex::new(Vec::new());
    let old = json!({ "kind": "ConfigMap", "metadata": { "name": "c1-klusterlet" } });
    let new = work("c1-klusterlet", vec![cond("Available", "True")]);
    assert_eq!(work_pipeline().handle_raw(WatchEvent::Update { old, new }, &q), Outcome::FilteredOut);
}

#[test]
fn work_create_and_delete_always_admitted() {
    let q = Mutex::new(Vec::new());
    let p = work_pipeline();
    assert!(matches!(p.handle_raw(WatchEvent::Create(work("c1-klusterlet", vec![])), &q), Outcome::Enqueued(_)));
    assert!(matches!(p.handle_raw(WatchEvent::Delete(work("c2-klusterlet-crds", vec![])), &q), Outcome::Enqueued(_)));
    assert_eq!(p.handle_raw(WatchEvent::Generic(work("c3-klusterlet", vec![])), &q), Outcome::FilteredOut);
    assert_eq!(keys(&q), vec!["c1", "c2"]);
}

#[test]
fn admitted_work_without_cluster_key_is_dropped() {
    let q = Mutex::new(Vec::new());
    let out = work_pipeline().handle_raw(WatchEvent::Create(work("unrelated-object", vec![])), &q);
    assert_eq!(out, Outcome::Unkeyed);
    assert!(keys(&q).is_empty());
}

#[test]
fn nameless_payloads_are_malformed() {
    let q = Mutex::new(Vec::new());
    let out = cluster_pipeline().handle_raw(WatchEvent::Create(json!({ "metadata": {} })), &q);
    assert_eq!(out, Outcome::Malformed);
    assert!(keys(&q).is_empty());
}

#[tokio::test]
async fn run_forwards_into_unbounded_queue() {
    let (raw_tx, raw_rx) = tokio::sync::mpsc::channel(8);
    let (queue_tx, mut queue_rx) = tokio::sync::mpsc::unbounded_channel();
    let task = tokio::spawn(async move { work_pipeline().run(raw_rx, queue_tx).await });
    raw_tx.send(WatchEvent::Create(work("c1-klusterlet", vec![]))).await.unwrap();
    raw_tx.send(WatchEvent::Generic(work("c2-klusterlet", vec![]))).await.unwrap();
    raw_tx.send(WatchEvent::Delete(work("c3-klusterlet", vec![]))).await.unwrap();
    drop(raw_tx);
    task.await.unwrap();
    let mut got = Vec::new();
    while let Ok(r) = queue_rx.try_recv() {
        got.push(r.name);
    }
    assert_eq!(got, vec!["c1", "c3"]);
}
