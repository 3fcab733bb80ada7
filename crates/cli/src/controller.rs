//! Wires the two watch sources to the shared reconcile queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use importstatus_core::{FromRaw, ReconcileRequest, MANAGED_CLUSTER_GVK, MANIFEST_WORK_GVK};
use importstatus_filter::{cluster_pipeline, work_pipeline, EventFilter, KeyMapper, Pipeline};
use importstatus_kubehub::{start_watcher, WatchTarget};
use importstatus_queue::{spawn_queue, QueueOptions};
use kube::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::reconciler::LoggingReconciler;

pub const CONTROLLER_NAME: &str = "import-status-controller";

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub max_concurrent: usize,
    pub work_label_selector: Option<String>,
    /// Buffered raw events per source.
    pub event_buffer: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self { max_concurrent: 1, work_label_selector: None, event_buffer: 1024 }
    }
}

fn spawn_source<T, F, M>(
    client: Client,
    target: WatchTarget,
    pipeline: Pipeline<T, F, M>,
    queue: mpsc::UnboundedSender<ReconcileRequest>,
    buffer: usize,
) -> Vec<JoinHandle<()>>
where
    T: FromRaw + Send + 'static,
    F: EventFilter<T> + 'static,
    M: KeyMapper<T> + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let gvk = target.gvk_key.clone();
    let watch = tokio::spawn(async move {
        if let Err(e) = start_watcher(client, target, tx).await {
            error!(gvk = %gvk, error = ?e, "watcher failed");
        }
    });
    let filter = tokio::spawn(async move { pipeline.run(rx, queue).await });
    vec![watch, filter]
}

/// Register both sources: klusterlet works keyed by owning cluster, and
/// default-mode ManagedClusters keyed by name.
pub fn add(client: Client, opts: &ControllerOptions, queue: mpsc::UnboundedSender<ReconcileRequest>) -> Vec<JoinHandle<()>> {
    let work_target = WatchTarget::new(MANIFEST_WORK_GVK).with_labels(opts.work_label_selector.clone());
    let cluster_target = WatchTarget::new(MANAGED_CLUSTER_GVK);
    let mut tasks = spawn_source(client.clone(), work_target, work_pipeline(), queue.clone(), opts.event_buffer);
    tasks.extend(spawn_source(client, cluster_target, cluster_pipeline(), queue, opts.event_buffer));
    info!(controller = CONTROLLER_NAME, max_concurrent = opts.max_concurrent, "controller sources registered");
    tasks
}

/// Run until Ctrl-C, then stop the sources and drain the queue.
pub async fn run(opts: ControllerOptions) -> Result<()> {
    let client = Client::try_default().await.context("building kube client")?;
    let (queue_tx, queue) = spawn_queue(
        Arc::new(LoggingReconciler),
        QueueOptions { max_concurrent: opts.max_concurrent, ..Default::default() },
    );
    let tasks = add(client, &opts, queue_tx);

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!(controller = CONTROLLER_NAME, "shutting down");
    for t in &tasks {
        t.abort();
    }
    if tokio::time::timeout(Duration::from_secs(10), queue.join()).await.is_err() {
        warn!("reconcile queue did not drain in time");
    }
    Ok(())
}
