use std::{
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{clock::Clock, exporter::MetricsExporter, sampler::Sampler, Sample};

/// One collection cycle: run every sampler, stamp the readings with host and
/// time, hand the batch to every exporter.
#[derive(Debug)]
pub struct CollectionJob {
    host: String,
    clock: Arc<dyn Clock>,
    samplers: Vec<Box<dyn Sampler>>,
    exporters: Vec<Arc<dyn MetricsExporter>>,
}
impl CollectionJob {
    pub fn new(host: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            host: host.into(),
            clock,
            samplers: vec![],
            exporters: vec![],
        }
    }

    pub fn with_sampler(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.samplers.push(sampler);
        self
    }
    pub fn with_exporter(mut self, exporter: Arc<dyn MetricsExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the number of samples collected.
    pub fn run_once(&mut self) -> usize {
        let time = self.clock.now();
        let mut batch = vec![];
        for sampler in &mut self.samplers {
            for reading in sampler.sample() {
                batch.push(Sample {
                    name: reading.name,
                    value: reading.value,
                    unit: reading.unit,
                    host: self.host.clone(),
                    time,
                });
            }
        }
        let n = batch.len();
        if n == 0 {
            return 0;
        }
        for exporter in &self.exporters {
            exporter.export(batch.clone());
        }
        debug!(host = %self.host, time, samples = n, "collected");
        n
    }
}

/// Runs a [`CollectionJob`] on its own thread at a fixed interval, starting
/// immediately.
#[derive(Debug)]
pub struct Scheduler {
    stop: mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<CollectionJob>>,
}
impl Scheduler {
    pub fn spawn(mut job: CollectionJob, interval: Duration) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel();
        info!(
            host = job.host(),
            every = %humantime::format_duration(interval),
            "collection started"
        );
        let thread = thread::Builder::new()
            .name("collector".into())
            .spawn(move || {
                loop {
                    job.run_once();
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                job
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stops ticking after the current cycle and hands the job back.
    pub fn stop(mut self) -> Option<CollectionJob> {
        let _ = self.stop.send(());
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(job) => Some(job),
            Err(_) => {
                warn!("collection thread panicked");
                None
            }
        }
    }
}
impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}
