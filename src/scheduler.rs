use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::{Reconciler, RunContext, RunTrigger};

/// Runs a full reconciliation pass every `period`, starting one period from now
///
/// Passes never overlap: a pass that overruns delays the next tick instead of queueing one.
pub fn spawn_scheduler(reconciler: Arc<Reconciler>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;

            let ctx = RunContext::new(RunTrigger::Scheduled);
            match reconciler.run_scheduled_reconciliation(&ctx).await {
                Ok(summary) => tracing::debug!(
                    run_id = %summary.run_id,
                    failed = summary.failed,
                    "Scheduled pass complete"
                ),
                Err(e) => tracing::error!(
                    run_id = %ctx.run_id,
                    error = %e,
                    "Scheduled pass could not run"
                ),
            }
        }
    })
}
