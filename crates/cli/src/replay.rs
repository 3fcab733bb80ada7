//! Offline replay of recorded watch events through the filters.
//!
//! One JSON object per line:
//! `{"kind":"work","type":"update","old":{..},"object":{..}}`.
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use importstatus_core::{ReconcileRequest, WatchEvent};
use importstatus_filter::{cluster_pipeline, work_pipeline, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cluster,
    Work,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Update,
    Delete,
    Generic,
}

#[derive(Debug, Deserialize)]
pub struct ReplayRecord {
    pub kind: Source,
    #[serde(rename = "type")]
    pub event: EventType,
    pub object: Value,
    #[serde(default)]
    pub old: Option<Value>,
}

impl ReplayRecord {
    pub fn into_event(self) -> Result<WatchEvent<Value>> {
        Ok(match self.event {
            EventType::Create => WatchEvent::Create(self.object),
            EventType::Delete => WatchEvent::Delete(self.object),
            EventType::Generic => WatchEvent::Generic(self.object),
            EventType::Update => {
                let old = self.old.ok_or_else(|| anyhow!("update event without \"old\" object"))?;
                WatchEvent::Update { old, new: self.object }
            }
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayLine {
    pub line: usize,
    pub kind: &'static str,
    pub event: &'static str,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

pub fn replay(reader: impl BufRead) -> Result<Vec<ReplayLine>> {
    let clusters = cluster_pipeline();
    let works = work_pipeline();
    let sink: Mutex<Vec<ReconcileRequest>> = Mutex::new(Vec::new());
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let n = idx + 1;
        let line = line.with_context(|| format!("reading line {}", n))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let rec: ReplayRecord = serde_json::from_str(trimmed).with_context(|| format!("parsing line {}", n))?;
        let source = rec.kind;
        let event = rec.into_event().with_context(|| format!("line {}", n))?;
        let category = event.category().as_str();
        let (kind, outcome) = match source {
            Source::Cluster => (clusters.kind(), clusters.handle_raw(event, &sink)),
            Source::Work => (works.kind(), works.handle_raw(event, &sink)),
        };
        let cluster = match &outcome {
            Outcome::Enqueued(req) => Some(req.name.clone()),
            _ => None,
        };
        out.push(ReplayLine { line: n, kind, event: category, outcome: outcome.as_str(), cluster });
    }
    Ok(out)
}
