//! One-shot FaaS/CLI entry point for the QPS autoscaling controller.
//!
//! Invoked as `asc-tick [event-kind] [group-id]` for a single pass, or
//! `asc-tick serve` to stay resident behind a small axum health/metrics
//! surface (and a `/invoke` endpoint) for deployments that front the
//! controller with a scheduler rather than a FaaS trigger.
//!
//! ## Event kinds (spec.md §6)
//!
//! - `scaling_evaluation` (default): runs one tick end to end.
//! - `status [group_id]`: read-only snapshot of cooldown/circuit state,
//!   latest cached metrics, and recent activity history.
//! - `validation`: checks config validity and facade connectivity
//!   without touching any ASG.
//!
//! ## Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ASC_CONFIG` | - | Path to a TOML config file |
//! | `ASC_HTTP_PORT` | `8080` | Port for `serve` mode |
//! | `RUST_LOG` | `info` | Log level |
//! | `LOG_FORMAT` | text | `json` for structured production logs |

mod alerts;
mod events;
mod server;

use asc_asg::HttpAsgFacade;
use asc_catalog::PostgresCatalogRepository;
use asc_config::AppConfig;
use asc_controller::Controller;
use asc_metrics::HttpMetricsFacade;
use asc_state::PostgresStateRepository;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

pub struct AppContext {
    pub config: AppConfig,
    pub catalog: Arc<PostgresCatalogRepository>,
    pub state: Arc<PostgresStateRepository>,
    pub metrics: Arc<HttpMetricsFacade>,
    pub asg: Arc<HttpAsgFacade>,
    pub controller: Arc<Controller>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    asc_common::logging::init_logging("asc-tick");
    let metrics_handle = install_metrics_recorder();

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    info!(max_concurrency = config.controller.max_concurrency, "configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let catalog_repo = PostgresCatalogRepository::new(pool.clone());
    let state_repo = PostgresStateRepository::new(pool.clone());
    if config.dev_mode {
        catalog_repo.init_schema().await?;
        state_repo.init_schema().await?;
    }
    let catalog: Arc<PostgresCatalogRepository> = Arc::new(catalog_repo);
    let state = Arc::new(state_repo);
    let asg = Arc::new(HttpAsgFacade::new(config.asg_client.clone())?);
    let metrics = Arc::new(HttpMetricsFacade::new(config.metrics_client.clone())?);

    let controller = Arc::new(Controller::new(
        catalog.clone() as Arc<dyn asc_catalog::CatalogRepository>,
        metrics.clone() as Arc<dyn asc_metrics::MetricsFacade>,
        asg.clone() as Arc<dyn asc_asg::AsgFacade>,
        state.clone() as Arc<dyn asc_state::StateRepository>,
        config.controller.clone(),
        config.circuit_breaker,
    ));

    let ctx = AppContext {
        config,
        catalog,
        state,
        metrics,
        asg,
        controller,
        metrics_handle,
    };

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "scaling_evaluation".to_string());

    if mode == "serve" {
        return server::serve(ctx).await;
    }

    let group_arg = args.next().and_then(|s| s.parse::<i64>().ok());
    let result = events::dispatch(&ctx, &mode, group_arg, Utc::now()).await;

    let exit_code = if result.status_code == 200 { 0 } else { 1 };
    println!("{}", serde_json::to_string_pretty(&result)?);
    std::process::exit(exit_code);
}

fn install_metrics_recorder() -> metrics_exporter_prometheus::PrometheusHandle {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}
