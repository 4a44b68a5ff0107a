//! Samples this host and ships the readings to the configured exporters.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use hostmetrics::{
    clock::{Clock, SystemClock},
    config::{AgentConfig, ExporterSettings},
    exporter::{BatchingExporter, FlushLoop, MetricsExporter},
    sampler::{resolve_host_name, CpuSampler, MemorySampler},
    scheduler::{CollectionJob, Scheduler},
    transport::{HttpTransport, LogTransport, Transport},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "AGENT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = AgentConfig::load(args.config.as_deref()).context("agent configuration")?;
    let host = config.hostname.clone().unwrap_or_else(resolve_host_name);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut job = CollectionJob::new(host, clock);
    if config.collectors.cpu {
        job = job.with_sampler(Box::new(CpuSampler::new()));
    }
    if config.collectors.memory {
        job = job.with_sampler(Box::new(MemorySampler::new()));
    }

    let mut flush_loops = vec![];
    let web = &config.exporters.webservice;
    if web.enabled {
        let transport = HttpTransport::new(web.server_url.clone(), web.timeout());
        info!(url = transport.url(), "webservice exporter enabled");
        let (exporter, flush_loop) =
            start_exporter(&config, "webservice", transport, &web.exporter())?;
        job = job.with_exporter(exporter);
        flush_loops.push(flush_loop);
    }
    let logging = &config.exporters.logging;
    if logging.enabled {
        let (exporter, flush_loop) = start_exporter(&config, "logging", LogTransport, logging)?;
        job = job.with_exporter(exporter);
        flush_loops.push(flush_loop);
    }
    if flush_loops.is_empty() {
        warn!("no exporter enabled; samples will be discarded");
    }

    let scheduler = Scheduler::spawn(job, config.interval()).context("collection thread")?;

    tokio::signal::ctrl_c().await.context("listening for Ctrl-C")?;
    info!("shutting down");
    tokio::task::spawn_blocking(move || scheduler.stop())
        .await
        .context("stopping collection")?;
    for flush_loop in flush_loops {
        flush_loop.shutdown().await;
    }
    Ok(())
}

fn start_exporter<T: Transport + 'static>(
    config: &AgentConfig,
    name: &str,
    transport: T,
    settings: &ExporterSettings,
) -> anyhow::Result<(Arc<dyn MetricsExporter>, FlushLoop)> {
    let exporter_config = config.exporter_config(settings);
    let exporter = BatchingExporter::new(name, transport, &exporter_config)
        .with_context(|| format!("{name} exporter"))?;
    let exporter: Arc<dyn MetricsExporter> = Arc::new(exporter);
    let flush_loop = FlushLoop::spawn(exporter.clone(), &exporter_config);
    Ok((exporter, flush_loop))
}
