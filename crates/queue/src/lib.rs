//! Reconcile queue: coalesces cluster keys and runs them through a reconciler
//! with bounded concurrency, never running one key twice at the same time.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use importstatus_core::ReconcileRequest;
use metrics::{counter, histogram};
use rustc_hash::FxHashSet;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consumer of reconcile keys.
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync + 'static {
    async fn reconcile(&self, req: &ReconcileRequest) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Keys reconciled in parallel (floored at 1).
    pub max_concurrent: usize,
    /// Delay before a failed key is retried.
    pub requeue_after: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { max_concurrent: 1, requeue_after: Duration::from_secs(5) }
    }
}

/// Pending keys in FIFO order of first arrival; duplicates collapse.
#[derive(Debug, Default)]
pub struct PendingKeys {
    queued: FxHashSet<String>,
    order: VecDeque<ReconcileRequest>,
}

impl PendingKeys {
    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    /// Returns false when the key was already pending.
    pub fn push(&mut self, req: ReconcileRequest) -> bool {
        if !self.queued.insert(req.name.clone()) {
            return false;
        }
        self.order.push_back(req);
        true
    }

    pub fn pop(&mut self) -> Option<ReconcileRequest> {
        let req = self.order.pop_front()?;
        self.queued.remove(&req.name);
        Some(req)
    }
}

/// Bookkeeping for pending, in-flight and dirty keys.
///
/// A key is never both pending and in flight; a key enqueued while in flight
/// is marked dirty and goes back to pending once the running pass finishes.
#[derive(Debug)]
pub struct QueueState {
    pending: PendingKeys,
    in_flight: FxHashSet<String>,
    dirty: FxHashSet<String>,
    max_concurrent: usize,
    processed: u64,
    failed: u64,
}

impl QueueState {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            pending: PendingKeys::default(),
            in_flight: FxHashSet::default(),
            dirty: FxHashSet::default(),
            max_concurrent: max_concurrent.max(1),
            processed: 0,
            failed: 0,
        }
    }

    pub fn add(&mut self, req: ReconcileRequest) {
        if self.in_flight.contains(&req.name) {
            self.dirty.insert(req.name);
        } else {
            self.pending.push(req);
        }
    }

    /// Next key to start, if a worker slot is free.
    pub fn next_ready(&mut self) -> Option<ReconcileRequest> {
        if self.in_flight.len() >= self.max_concurrent {
            return None;
        }
        let req = self.pending.pop()?;
        self.in_flight.insert(req.name.clone());
        Some(req)
    }

    pub fn finish(&mut self, req: &ReconcileRequest, ok: bool) {
        self.in_flight.remove(&req.name);
        self.processed += 1;
        if !ok {
            self.failed += 1;
        }
        if self.dirty.remove(&req.name) {
            self.pending.push(req.clone());
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            processed: self.processed,
            failed: self.failed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub processed: u64,
    pub failed: u64,
}

/// Handle for observing a running queue.
pub struct QueueHandle {
    stats: Arc<ArcSwap<QueueStats>>,
    processed_rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl QueueHandle {
    pub fn stats(&self) -> Arc<QueueStats> { self.stats.load_full() }
    pub fn subscribe_processed(&self) -> watch::Receiver<u64> { self.processed_rx.clone() }

    /// Wait for the queue loop to exit. It exits once every sender is dropped
    /// and the remaining keys have been reconciled.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "reconcile queue task failed");
        }
    }
}

/// Run one key. The reconcile itself runs in its own task so a panic comes
/// back as a `JoinError` and the key is still reported as finished.
fn start<R: Reconciler>(reconciler: &Arc<R>, req: ReconcileRequest, done_tx: &mpsc::UnboundedSender<(ReconcileRequest, bool)>) {
    let reconciler = Arc::clone(reconciler);
    let done_tx = done_tx.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let run = {
            let req = req.clone();
            tokio::spawn(async move { reconciler.reconcile(&req).await })
        };
        let ok = match run.await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(cluster = %req, error = %e, "reconcile failed");
                false
            }
            Err(e) => {
                error!(cluster = %req, error = %e, "reconcile task aborted");
                false
            }
        };
        histogram!("importstatus_reconcile_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("importstatus_reconcile_total", 1u64, "result" => if ok { "ok" } else { "error" });
        let _ = done_tx.send((req, ok));
    });
}

/// Spawn the queue loop. Returns the key sender and a handle for observers.
pub fn spawn_queue<R: Reconciler>(reconciler: Arc<R>, opts: QueueOptions) -> (mpsc::UnboundedSender<ReconcileRequest>, QueueHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ReconcileRequest>();
    let stats = Arc::new(ArcSwap::from_pointee(QueueStats::default()));
    let (processed_tx, processed_rx) = watch::channel(0u64);
    let stats_clone = Arc::clone(&stats);

    let task = tokio::spawn(async move {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(ReconcileRequest, bool)>();
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<ReconcileRequest>();
        let mut state = QueueState::new(opts.max_concurrent);
        let mut closed = false;
        loop {
            while let Some(req) = state.next_ready() {
                debug!(cluster = %req, "reconcile started");
                start(&reconciler, req, &done_tx);
            }
            let snapshot = state.stats();
            let processed = snapshot.processed;
            stats_clone.store(Arc::new(snapshot));
            let _ = processed_tx.send(processed);
            if closed && state.is_idle() {
                break;
            }
            tokio::select! {
                maybe = rx.recv(), if !closed => match maybe {
                    Some(req) => state.add(req),
                    None => {
                        debug!("reconcile key channel closed; draining");
                        closed = true;
                    }
                },
                Some((req, ok)) = done_rx.recv() => {
                    state.finish(&req, ok);
                    if !ok && !closed {
                        let retry_tx = retry_tx.clone();
                        let delay = opts.requeue_after;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = retry_tx.send(req);
                        });
                    }
                }
                Some(req) = retry_rx.recv() => state.add(req),
            }
        }
        info!("reconcile queue stopped");
    });

    (tx, QueueHandle { stats, processed_rx, task })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: &str) -> ReconcileRequest { ReconcileRequest::new(n) }

    #[test]
    fn pending_keys_collapse_duplicates_fifo() {
        let mut p = PendingKeys::default();
        assert!(p.push(key("a")));
        assert!(p.push(key("b")));
        assert!(!p.push(key("a")));
        assert_eq!(p.len(), 2);
        assert_eq!(p.pop(), Some(key("a")));
        assert!(p.push(key("a")));
        assert_eq!(p.pop(), Some(key("b")));
        assert_eq!(p.pop(), Some(key("a")));
        assert!(p.is_empty());
    }

    #[test]
    fn in_flight_key_is_rerun_once_after_finish() {
        let mut s = QueueState::new(4);
        s.add(key("c1"));
        let running = s.next_ready().expect("ready");
        s.add(key("c1"));
        s.add(key("c1"));
        assert_eq!(s.next_ready(), None);
        s.finish(&running, true);
        assert_eq!(s.next_ready(), Some(key("c1")));
        assert_eq!(s.next_ready(), None);
    }

    #[test]
    fn concurrency_limit_holds_back_keys() {
        let mut s = QueueState::new(0);
        s.add(key("a"));
        s.add(key("b"));
        assert!(s.next_ready().is_some());
        assert!(s.next_ready().is_none());
        assert_eq!(s.stats(), QueueStats { pending: 1, in_flight: 1, processed: 0, failed: 0 });
    }

    #[test]
    fn failures_are_counted() {
        let mut s = QueueState::new(1);
        s.add(key("a"));
        let a = s.next_ready().expect("ready");
        s.finish(&a, false);
        assert!(s.is_idle());
        assert_eq!(s.stats().failed, 1);
        assert_eq!(s.stats().processed, 1);
    }
}
