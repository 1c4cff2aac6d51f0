use std::time::Duration;

use spotifriends::{
    api::{create_router, AppState},
    config::Config,
    scheduler::spawn_scheduler,
    telemetry::init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    let (state, cache_handle) = AppState::from_config(&config).await?;

    let scheduler = (config.reconcile_interval_secs > 0).then(|| {
        tracing::info!(
            interval_secs = config.reconcile_interval_secs,
            "In-process reconciliation scheduler enabled"
        );
        spawn_scheduler(
            state.reconciler.clone(),
            Duration::from_secs(config.reconcile_interval_secs),
        )
    });

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    cache_handle.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
