use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{buf::MetricBuf, codec::encode_group, transport::Transport, Error, Result, Sample};

/// Receives each collection cycle's samples.
pub trait MetricsExporter: core::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    /// Never blocks on delivery and never fails.
    fn export(&self, samples: Vec<Sample>);
    fn flush(&self) -> FlushReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExporterConfig {
    pub flush_interval: Duration,
    /// When off, every export is delivered synchronously.
    pub batching: bool,
    pub shutdown_grace: Duration,
}
impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            batching: true,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub groups: usize,
    pub delivered: usize,
    pub failed_groups: usize,
    pub requeued: usize,
}

/// Buffers samples and ships them per host on flush.
///
/// Groups that fail to deliver go back to the front of the buffer and are
/// retried on the next flush ahead of newer samples. There is no retry cap,
/// so a sink that stays down makes the buffer grow without bound; the
/// backlog is reported on every failed flush.
#[derive(Debug)]
pub struct BatchingExporter<T> {
    name: String,
    buf: MetricBuf,
    transport: T,
    batching: bool,
    flushing: Mutex<()>,
}
impl<T: Transport> BatchingExporter<T> {
    pub fn new(name: impl Into<String>, transport: T, config: &ExporterConfig) -> Result<Self> {
        if config.flush_interval.is_zero() {
            return Err(Error::config("flush_interval", "must be greater than zero"));
        }
        Ok(Self {
            name: name.into(),
            buf: MetricBuf::new(),
            transport,
            batching: config.batching,
            flushing: Mutex::new(()),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn submit(&self, samples: Vec<Sample>) {
        if samples.is_empty() {
            return;
        }
        self.buf.append(samples);
        if !self.batching {
            self.flush_buffered();
        }
    }

    /// Blocking I/O
    pub fn flush_buffered(&self) -> FlushReport {
        let _serial = self.flushing.lock();
        let mut report = FlushReport::default();
        let samples = self.buf.take();
        if samples.is_empty() {
            return report;
        }

        let mut failed = vec![];
        for (host, group) in group_by_host(samples) {
            report.groups += 1;
            let delivery = encode_group(&host, &group)
                .map_err(anyhow::Error::from)
                .and_then(|payload| self.transport.deliver(&payload));
            match delivery {
                Ok(()) => report.delivered += group.len(),
                Err(e) => {
                    warn!(
                        exporter = %self.name,
                        host = %host,
                        samples = group.len(),
                        error = %format_args!("{e:#}"),
                        "delivery failed; requeueing"
                    );
                    report.failed_groups += 1;
                    failed.extend(group);
                }
            }
        }
        if !failed.is_empty() {
            report.requeued = failed.len();
            let backlog = self.buf.requeue_front(failed);
            warn!(exporter = %self.name, backlog, "samples held for retry");
        }
        debug!(
            exporter = %self.name,
            groups = report.groups,
            delivered = report.delivered,
            requeued = report.requeued,
            "flushed"
        );
        report
    }
}
impl<T: Transport> MetricsExporter for BatchingExporter<T> {
    fn name(&self) -> &str {
        &self.name
    }
    fn export(&self, samples: Vec<Sample>) {
        self.submit(samples);
    }
    fn flush(&self) -> FlushReport {
        self.flush_buffered()
    }
}

/// Splits samples per host, hosts in first-seen order, samples in buffer
/// order.
fn group_by_host(samples: VecDeque<Sample>) -> Vec<(String, Vec<Sample>)> {
    let mut groups: Vec<(String, Vec<Sample>)> = vec![];
    let mut index: HashMap<String, usize> = HashMap::new();
    for sample in samples {
        let i = *index.entry(sample.host.clone()).or_insert_with(|| {
            groups.push((sample.host.clone(), vec![]));
            groups.len() - 1
        });
        groups[i].1.push(sample);
    }
    groups
}

/// Periodic flusher for one exporter. Call [`shutdown`](Self::shutdown) to
/// deliver what is still buffered; dropping the handle aborts the timer
/// without a final flush.
#[derive(Debug)]
pub struct FlushLoop {
    exporter: Arc<dyn MetricsExporter>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    grace: Duration,
}
impl FlushLoop {
    /// Must be called within a tokio runtime.
    pub fn spawn(exporter: Arc<dyn MetricsExporter>, config: &ExporterConfig) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let period = config.flush_interval;
        let flusher = exporter.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let exporter = flusher.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || exporter.flush()).await {
                            error!(exporter = flusher.name(), error = %e, "flush task failed");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        info!(
            exporter = exporter.name(),
            every = %humantime::format_duration(period),
            "flush loop started"
        );
        Self {
            exporter,
            stop,
            task: Some(task),
            grace: config.shutdown_grace,
        }
    }

    pub fn exporter(&self) -> &Arc<dyn MetricsExporter> {
        &self.exporter
    }

    /// Flushes once more, then stops the timer. Each step waits at most the
    /// shutdown grace period; what is still buffered after a timed-out final
    /// flush is lost.
    pub async fn shutdown(mut self) -> FlushReport {
        let name = self.exporter.name().to_string();
        let grace = humantime::format_duration(self.grace);
        let exporter = self.exporter.clone();
        let final_flush = tokio::task::spawn_blocking(move || exporter.flush());
        let report = match tokio::time::timeout(self.grace, final_flush).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                error!(exporter = %name, error = %e, "final flush failed");
                FlushReport::default()
            }
            Err(_) => {
                warn!(exporter = %name, %grace, "final flush did not finish in time");
                FlushReport::default()
            }
        };

        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.grace, task).await.is_err() {
                warn!(exporter = %name, %grace, "flush timer did not stop in time; aborting");
                abort.abort();
            }
        }
        info!(
            exporter = %name,
            delivered = report.delivered,
            requeued = report.requeued,
            "exporter shut down"
        );
        report
    }
}
impl Drop for FlushLoop {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            warn!(
                exporter = self.exporter.name(),
                "flush loop dropped without shutdown"
            );
            task.abort();
        }
    }
}
