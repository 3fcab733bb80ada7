//! Dispatch boundary: filter, key and forward events to the reconcile queue.

use std::marker::PhantomData;
use std::sync::Mutex;

use importstatus_core::{FromRaw, ReconcileRequest, WatchEvent};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::mapper::KeyMapper;
use crate::predicate::EventFilter;

/// Sink for reconcile keys. Deduplication is the queue's business.
pub trait Enqueue: Send + Sync {
    fn enqueue(&self, req: ReconcileRequest);
}

impl Enqueue for mpsc::UnboundedSender<ReconcileRequest> {
    fn enqueue(&self, req: ReconcileRequest) {
        if let Err(e) = self.send(req) {
            debug!(cluster = %e.0, "reconcile queue closed; dropping key");
        }
    }
}

/// Collects keys in memory (replays and tests).
impl Enqueue for Mutex<Vec<ReconcileRequest>> {
    fn enqueue(&self, req: ReconcileRequest) {
        if let Ok(mut keys) = self.lock() {
            keys.push(req);
        }
    }
}

impl<Q: Enqueue + ?Sized> Enqueue for std::sync::Arc<Q> {
    fn enqueue(&self, req: ReconcileRequest) {
        (**self).enqueue(req)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Enqueued(ReconcileRequest),
    /// Rejected by the filter.
    FilteredOut,
    /// Admitted, but no cluster key could be derived.
    Unkeyed,
    /// Payload could not be decoded into a snapshot.
    Malformed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Enqueued(_) => "enqueued",
            Outcome::FilteredOut => "filtered",
            Outcome::Unkeyed => "unkeyed",
            Outcome::Malformed => "malformed",
        }
    }
}

/// One watched kind: its filter and key mapper.
pub struct Pipeline<T, F, M> {
    kind: &'static str,
    filter: F,
    mapper: M,
    _snapshot: PhantomData<fn(&T)>,
}

impl<T, F, M> Pipeline<T, F, M>
where
    F: EventFilter<T>,
    M: KeyMapper<T>,
{
    pub fn new(kind: &'static str, filter: F, mapper: M) -> Self {
        Self { kind, filter, mapper, _snapshot: PhantomData }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Enqueue at most one key for a typed event.
    pub fn handle(&self, event: &WatchEvent<T>, queue: &dyn Enqueue) -> Outcome {
        let category = event.category().as_str();
        let outcome = if !self.filter.admit(event) {
            Outcome::FilteredOut
        } else {
            match self.mapper.map(event) {
                Some(req) => {
                    debug!(kind = self.kind, event = category, cluster = %req, "enqueue reconcile");
                    queue.enqueue(req.clone());
                    counter!("importstatus_enqueued_total", 1u64, "kind" => self.kind);
                    Outcome::Enqueued(req)
                }
                None => Outcome::Unkeyed,
            }
        };
        trace!(kind = self.kind, event = category, outcome = outcome.as_str(), "event evaluated");
        counter!("importstatus_events_total", 1u64, "kind" => self.kind, "outcome" => outcome.as_str());
        outcome
    }
}

impl<T, F, M> Pipeline<T, F, M>
where
    T: FromRaw,
    F: EventFilter<T>,
    M: KeyMapper<T>,
{
    /// Decode a raw event then handle it. Undecodable payloads are dropped.
    pub fn handle_raw(&self, raw: WatchEvent<serde_json::Value>, queue: &dyn Enqueue) -> Outcome {
        match raw.try_map(T::from_raw) {
            Ok(event) => self.handle(&event, queue),
            Err(e) => {
                trace!(kind = self.kind, error = %e, "dropping undecodable event");
                counter!("importstatus_events_total", 1u64, "kind" => self.kind, "outcome" => Outcome::Malformed.as_str());
                Outcome::Malformed
            }
        }
    }

    /// Consume raw events until the source channel closes.
    pub async fn run<Q: Enqueue>(&self, mut rx: mpsc::Receiver<WatchEvent<serde_json::Value>>, queue: Q) {
        while let Some(raw) = rx.recv().await {
            self.handle_raw(raw, &queue);
        }
        debug!(kind = self.kind, "event channel closed");
    }
}
