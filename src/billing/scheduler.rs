use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::warn;

use super::reconciliation::{ReconcileSummary, Reconciler};

/// key: billing-reconciliation-scheduler -> periodic drift backstop
pub fn spawn(reconciler: Reconciler, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // a slow batch must not trigger a burst of catch-up runs
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = process_tick(&reconciler).await {
                warn!(?err, "billing reconciliation tick failed");
            }
        }
    })
}

/// key: billing-reconciliation-scheduler -> tick handler
pub async fn process_tick(reconciler: &Reconciler) -> Result<ReconcileSummary> {
    reconciler.reconcile_all().await
}
