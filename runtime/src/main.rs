//! Robopeer grading service - main entry point

use anyhow::{Context, Result};
use capsules_sandbox::Sandbox;
use clap::Parser;
use runtime::{create_app, AppState, Config};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    info!(
        bind_addr = %config.bind_addr,
        docker_socket = %config.docker_socket.display(),
        projects_dir = %config.projects_dir.display(),
        "starting robopeer"
    );

    let sandbox = Arc::new(Sandbox::new(config.sandbox_config()));
    match sandbox.ping().await {
        Ok(()) => info!("container daemon reachable"),
        Err(e) => warn!(error = %e, "container daemon not reachable yet"),
    }

    let app = create_app(AppState::new(Arc::clone(&sandbox)));
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("robopeer listening on {}", config.bind_addr);

    let registry = Arc::clone(sandbox.registry());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Killed jobs finish with exit code 137, letting their requests drain.
            let report = registry.kill_all().await;
            info!(
                killed = report.killed.len(),
                failed = report.failed.len(),
                "shutdown sweep finished"
            );
        })
        .await?;

    info!("robopeer stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, sweeping in-flight containers");
}
