use importstatus_core::ReconcileRequest;
use importstatus_queue::Reconciler;
use tracing::info;

use crate::controller::CONTROLLER_NAME;

/// Stand-in reconciler: records which clusters would have their import status recomputed.
pub struct LoggingReconciler;

#[async_trait::async_trait]
impl Reconciler for LoggingReconciler {
    async fn reconcile(&self, req: &ReconcileRequest) -> anyhow::Result<()> {
        info!(controller = CONTROLLER_NAME, cluster = %req, "reconcile import status");
        Ok(())
    }
}
