//! Import-status kubehub: discovery and list+watch sources that emit
//! create/update/delete events with old and new snapshots.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use futures::{Stream, StreamExt};
use importstatus_core::WatchEvent;
use kube::{
    api::Api,
    core::{DynamicObject, GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client,
};
use metrics::counter;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What to watch: a GVK key (`v1/Kind` or `group/v1/Kind`) and an optional label selector.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub gvk_key: String,
    pub label_selector: Option<String>,
}

impl WatchTarget {
    pub fn new(gvk_key: impl Into<String>) -> Self {
        Self { gvk_key: gvk_key.into(), label_selector: None }
    }

    pub fn with_labels(mut self, selector: Option<String>) -> Self {
        self.label_selector = selector.filter(|s| !s.is_empty());
        self
    }
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() })
        }
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<kube::core::ApiResource> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                debug!(gvk = %gvk.kind, namespaced = matches!(caps.scope, Scope::Namespaced), "resolved api resource");
                return Ok(ar);
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

/// `namespace/name` for namespaced objects, `name` otherwise.
pub fn object_key(raw: &Value) -> Option<String> {
    let meta = raw.get("metadata")?;
    let name = meta.get("name")?.as_str()?;
    match meta.get("namespace").and_then(|v| v.as_str()) {
        Some(ns) if !ns.is_empty() => Some(format!("{}/{}", ns, name)),
        _ => Some(name.to_string()),
    }
}

/// Turns level-based watcher output into edge events by remembering the last
/// snapshot seen for every object.
#[derive(Debug, Default)]
pub struct EventTracker {
    seen: FxHashMap<String, Value>,
}

impl EventTracker {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.seen.len() }
    pub fn is_empty(&self) -> bool { self.seen.is_empty() }

    /// First sighting is a create, later ones an update against the previous snapshot.
    pub fn applied(&mut self, raw: Value) -> Option<WatchEvent<Value>> {
        let key = object_key(&raw)?;
        Some(match self.seen.insert(key, raw.clone()) {
            Some(old) => WatchEvent::Update { old, new: raw },
            None => WatchEvent::Create(raw),
        })
    }

    pub fn deleted(&mut self, raw: Value) -> WatchEvent<Value> {
        if let Some(key) = object_key(&raw) {
            self.seen.remove(&key);
        }
        WatchEvent::Delete(raw)
    }

    /// A relist: objects in the list are applied, remembered objects missing
    /// from it are deleted with their last known snapshot.
    pub fn restarted(&mut self, list: Vec<Value>) -> Vec<WatchEvent<Value>> {
        let live: FxHashSet<String> = list.iter().filter_map(object_key).collect();
        let mut gone: Vec<String> = self.seen.keys().filter(|k| !live.contains(*k)).cloned().collect();
        gone.sort();
        let mut out: Vec<WatchEvent<Value>> =
            gone.into_iter().filter_map(|k| self.seen.remove(&k)).map(WatchEvent::Delete).collect();
        out.extend(list.into_iter().filter_map(|raw| self.applied(raw)));
        out
    }
}

fn raw_from(mut obj: DynamicObject, ar: &kube::core::ApiResource) -> Result<Value> {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
    }
    let mut raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

/// Feed watcher output through an [`EventTracker`] into `tx`.
///
/// Stream errors are logged and counted; the watcher retries on its own. Returns
/// once the receiver is dropped or the stream ends.
pub async fn pump_events<S, E>(stream: S, ar: &kube::core::ApiResource, gvk_key: &str, tx: mpsc::Sender<WatchEvent<Value>>)
where
    S: Stream<Item = Result<Event<DynamicObject>, E>>,
    E: std::fmt::Display,
{
    futures::pin_mut!(stream);
    let mut tracker = EventTracker::new();
    while let Some(item) = stream.next().await {
        let ev = match item {
            Ok(ev) => ev,
            Err(e) => {
                warn!(gvk = %gvk_key, error = %e, "watch error; retrying");
                counter!("importstatus_watch_errors_total", 1u64, "gvk" => gvk_key.to_string());
                continue;
            }
        };
        let events: Vec<WatchEvent<Value>> = match ev {
            Event::Applied(o) => raw_or_skip(o, ar, gvk_key).and_then(|raw| tracker.applied(raw)).into_iter().collect(),
            Event::Deleted(o) => raw_or_skip(o, ar, gvk_key).map(|raw| tracker.deleted(raw)).into_iter().collect(),
            Event::Restarted(list) => {
                debug!(gvk = %gvk_key, count = list.len(), "watch restart");
                counter!("importstatus_watch_restarts_total", 1u64, "gvk" => gvk_key.to_string());
                let raws = list.into_iter().filter_map(|o| raw_or_skip(o, ar, gvk_key)).collect();
                tracker.restarted(raws)
            }
        };
        for e in events {
            if tx.send(e).await.is_err() {
                debug!(gvk = %gvk_key, "event receiver dropped; stopping watcher");
                return;
            }
        }
    }
    warn!(gvk = %gvk_key, "watcher stream ended");
}

fn raw_or_skip(obj: DynamicObject, ar: &kube::core::ApiResource, gvk_key: &str) -> Option<Value> {
    match raw_from(obj, ar) {
        Ok(raw) => Some(raw),
        Err(e) => {
            warn!(gvk = %gvk_key, error = ?e, "skipping unserializable object");
            None
        }
    }
}

/// List+watch a GVK and send create/update/delete events into `tx` until the
/// receiver goes away. Only resolving the GVK can fail.
pub async fn start_watcher(client: Client, target: WatchTarget, tx: mpsc::Sender<WatchEvent<Value>>) -> Result<()> {
    let gvk = parse_gvk_key(&target.gvk_key)?;
    let ar = find_api_resource(client.clone(), &gvk).await?;
    // All namespaces: klusterlet works live in each cluster's namespace.
    let api: Api<DynamicObject> = Api::all_with(client, &ar);

    let mut cfg = watcher::Config::default();
    if let Some(sel) = target.label_selector.as_deref() {
        cfg = cfg.labels(sel);
    }
    let stream = watcher::watcher(api, cfg).default_backoff();
    info!(gvk = %target.gvk_key, labels = ?target.label_selector, "watcher started");
    pump_events(stream, &ar, &target.gvk_key, tx).await;
    Ok(())
}
