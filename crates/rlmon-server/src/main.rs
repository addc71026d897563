use anyhow::Result;
use chrono::Utc;
use rlmon_notify::{EventPublisher, LogPublisher, WebhookPublisher};
use rlmon_storage::SqliteStore;
use rlmon_upstream::HttpDirectoryClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use rlmon_server::app;
use rlmon_server::config::MonitorConfig;
use rlmon_server::metrics::PrometheusExporter;
use rlmon_server::monitor::{MonitorPipeline, MonitorScheduler, PipelineDeps, PipelineSettings};
use rlmon_server::state::AppState;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  rlmon-server [config.toml]    Start the monitor (default: config/rlmon.toml)");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if matches!(args.get(1).map(String::as_str), Some("--help" | "-h")) {
        print_usage();
        return Ok(());
    }
    let config_path = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("config/rlmon.toml");
    let config = MonitorConfig::load(config_path)?;

    rlmon_common::id::init(1, 1);

    let filter = EnvFilter::from_default_env().add_directive("rlmon=info".parse()?);
    if config.log_format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    run_server(config).await
}

async fn run_server(config: MonitorConfig) -> Result<()> {
    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        upstream = %config.upstream.base_url,
        tick_secs = config.schedule.tick_secs,
        "rlmon-server starting"
    );

    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data dir '{}': {}", config.data_dir, e))?;
    let store = Arc::new(SqliteStore::open(&config.db_path())?);

    let directory = Arc::new(HttpDirectoryClient::new(
        &config.upstream.base_url,
        config.upstream.token.clone(),
        Duration::from_secs(config.upstream.timeout_secs),
    )?);

    let publisher: Arc<dyn EventPublisher> = match &config.publisher.webhook_url {
        Some(url) => Arc::new(WebhookPublisher::new(
            url,
            Duration::from_secs(config.publisher.timeout_secs),
        )?),
        None => {
            tracing::info!("No webhook configured, alert events are only logged");
            Arc::new(LogPublisher)
        }
    };
    tracing::info!(publisher = publisher.name(), "Event publisher ready");

    let exporter = Arc::new(PrometheusExporter::new()?);

    let pipeline = Arc::new(MonitorPipeline::new(
        PipelineDeps {
            policies: store.clone(),
            states: store.clone(),
            alerts: store.clone(),
            directory,
            publisher,
            metrics: exporter.clone(),
        },
        PipelineSettings::from_config(&config),
    ));

    let scheduler = Arc::new(MonitorScheduler::new(
        pipeline.clone(),
        config.schedule.tick_secs,
    ));

    let state = AppState {
        start_time: Utc::now(),
        exporter,
        last_report: scheduler.last_report(),
        phase: pipeline.subscribe(),
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, app::build_http_app(state));

    let scheduler_handle = tokio::spawn(async move {
        scheduler.run().await;
    });

    tracing::info!(http = %http_addr, "Server started");

    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    scheduler_handle.abort();
    tracing::info!("Server stopped");

    Ok(())
}
