//! Receives host payloads and serves queries over the in-memory store.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use hostmetrics::{
    api::{app, AppState},
    clock::{Clock, SystemClock},
    config::CollectorConfig,
    store::TimeSeriesStore,
};
use poem::{listener::TcpListener, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "COLLECTOR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = CollectorConfig::load(args.config.as_deref()).context("collector configuration")?;
    let store_config = config.store_config()?;
    let addr = config.bind_addr()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(TimeSeriesStore::new(store_config, clock.clone()));
    let state = Arc::new(AppState { store, clock });

    info!(
        %addr,
        retention = %humantime::format_duration(store_config.retention),
        aggregation_interval = %humantime::format_duration(store_config.aggregation_interval),
        "collector listening"
    );
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    };
    Server::new(TcpListener::bind(addr))
        .run_with_graceful_shutdown(app(state), shutdown, Some(SHUTDOWN_TIMEOUT))
        .await
        .with_context(|| format!("serving on {addr}"))?;
    Ok(())
}
