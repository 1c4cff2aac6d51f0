//! One reconciliation pass over every registered user, for cron-style scheduling
//!
//! Exits non-zero only when the pass could not run; per-user failures are logged and reported
//! in the summary.

use spotifriends::{
    api::AppState,
    config::Config,
    services::{RunContext, RunTrigger},
    telemetry::init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    let (state, cache_handle) = AppState::from_config(&config).await?;

    let ctx = RunContext::new(RunTrigger::Scheduled);
    let result = state.reconciler.run_scheduled_reconciliation(&ctx).await;

    cache_handle.shutdown().await;

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
