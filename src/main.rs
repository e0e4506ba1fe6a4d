use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use exec_service::server::{self, AppState};
use exec_service::{ExecutionQueue, Runner, ServiceConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exec_service=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = ServiceConfig::load().context("Failed to load configuration")?;
    info!(
        "Starting execution service: mode={}, max_concurrent={}",
        config.mode, config.max_concurrent
    );

    let runner = Runner::from_config(&config).context("Failed to initialize runner")?;
    let queue = ExecutionQueue::new(config.max_concurrent);

    let health = runner.check_health().await;
    if health.healthy {
        info!("Backend healthy ({} mode)", health.mode);
    } else {
        warn!(
            "Backend not reachable at startup: {}",
            health.error.unwrap_or_default()
        );
    }

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    let state = AppState {
        queue: queue.clone(),
        runner: runner.clone(),
    };
    server::serve(listener, state, shutdown_signal()).await?;

    info!("Server stopped, draining execution queue...");
    let status = queue.status();
    info!(
        "{} running, {} queued at shutdown",
        status.running, status.queued
    );

    tokio::select! {
        _ = queue.drain() => {}
        _ = shutdown_signal() => {
            warn!("Second interrupt received, abandoning pending work");
            queue.clear();
            runner.cancel_pending();
            queue.drain().await;
        }
    }

    info!("Execution queue drained, bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
