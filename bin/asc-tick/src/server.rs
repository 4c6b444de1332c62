//! `serve` mode: keeps the controller resident behind a small axum surface
//! for deployments fronted by an external scheduler (cron sidecar, k8s
//! CronJob calling back in) rather than a FaaS trigger. Exposes the same
//! `/health`, `/ready`, `/metrics` triad every teacher service binary does,
//! plus a `POST /invoke` that runs one of the three event kinds on demand.

use crate::events;
use crate::AppContext;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Deserialize)]
struct InvokeParams {
    #[serde(default = "default_event_kind")]
    event: String,
    group_id: Option<i64>,
}

fn default_event_kind() -> String {
    "scaling_evaluation".to_string()
}

pub async fn serve(ctx: AppContext) -> anyhow::Result<()> {
    let port = ctx.config.http.port;
    let host = ctx.config.http.host.clone();
    let ctx = Arc::new(ctx);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/invoke", post(invoke_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!(%addr, "asc-tick serving");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("asc-tick shutdown complete");
    Ok(())
}

async fn invoke_handler(State(ctx): State<Arc<AppContext>>, Query(params): Query<InvokeParams>) -> Json<events::InvocationResult> {
    let result = events::dispatch(&ctx, &params.event, params.group_id, Utc::now()).await;
    Json(result)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP", "version": env!("CARGO_PKG_VERSION") }))
}

async fn ready_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "READY" }))
}

async fn metrics_handler(State(ctx): State<Arc<AppContext>>) -> String {
    ctx.metrics_handle.render()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
