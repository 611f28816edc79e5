//! HTTP endpoint exposing the engine's RPC actions.
//!
//! A single POST route accepts an [`EngineRequest`](journey_core::EngineRequest)
//! body and answers with `{"success": true, "data": ...}` or
//! `{"success": false, "error": ...}`. When a sweep interval is configured a
//! background task resumes due delays on that cadence.

mod errors;
mod handlers;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use jiff::Timestamp;
use journey_core::Engine;
use log::{error, info};
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::cors::{Any, CorsLayer};

use crate::args::ServeArgs;

/// Builds the router with permissive CORS for browser callers.
pub fn router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handlers::rpc))
        .route("/journey-engine", post(handlers::rpc))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(engine)
}

/// Serves the endpoint until SIGINT or SIGTERM.
pub async fn run(engine: Engine, args: ServeArgs) -> Result<()> {
    let sweeper = args
        .sweep_interval
        .filter(|secs| *secs > 0)
        .map(|secs| spawn_sweeper(engine.clone(), Duration::from_secs(secs)));

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("Listening on {}", args.listen);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    Ok(())
}

fn spawn_sweeper(engine: Engine, period: Duration) -> JoinHandle<()> {
    info!("Sweeping scheduled executions every {}s", period.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match engine.process_scheduled_executions(Timestamp::now()).await {
                Ok(report) if report.processed > 0 => {
                    info!("Sweep resumed {} executions", report.processed);
                }
                Ok(_) => {}
                Err(e) => error!("Sweep failed: {e}"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
