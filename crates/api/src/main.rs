use std::sync::Arc;

use anyhow::Context;
use queuectl_api::{DEFAULT_ADDR, DEFAULT_HOME};
use queuectl_infra::context::AppContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    queuectl_observability::init();

    let home = std::env::var("QUEUECTL_HOME").unwrap_or_else(|_| DEFAULT_HOME.to_string());
    let addr = std::env::var("QUEUECTL_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());

    let ctx = Arc::new(
        AppContext::open(&home).with_context(|| format!("failed to open queue data in {home}"))?,
    );
    let app = queuectl_api::app::build_app(ctx.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, home = %home, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Let in-flight jobs finish before exiting.
    if ctx.worker_status().running {
        let summary = tokio::task::spawn_blocking(move || ctx.stop_workers())
            .await
            .context("worker shutdown task failed")??;
        tracing::info!(workers = summary.workers, drained = summary.drained, "workers stopped");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
