use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::{
    aggregate::BucketSize,
    clock::Clock,
    series::{Maintenance, Point, PointValue, TimeSeries},
    MetricKey, Time,
};

type SeriesRef = Arc<Mutex<TimeSeries>>;
type HostSeries = HashMap<MetricKey, SeriesRef>;

/// host -> metric -> bucket start -> aggregate
pub type AggregatedView = BTreeMap<String, BTreeMap<MetricKey, BTreeMap<Time, PointValue>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub retention: Duration,
    pub aggregation_interval: Duration,
}
impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            aggregation_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// In-memory time series keyed by `(host, metric)`.
///
/// The index lock is only held to look up or create a series; every series
/// carries its own lock, so writers and readers on different keys proceed in
/// parallel. Retention and downsampling run on the written series as part of
/// each [`add_point`](Self::add_point).
#[derive(Debug)]
pub struct TimeSeriesStore {
    index: RwLock<HashMap<String, HostSeries>>,
    retention: Time,
    aggregation_interval: Time,
    clock: Arc<dyn Clock>,
}
impl TimeSeriesStore {
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let secs = |d: Duration| Time::try_from(d.as_secs()).unwrap_or(Time::MAX);
        Self {
            index: RwLock::new(HashMap::new()),
            retention: secs(config.retention),
            aggregation_interval: secs(config.aggregation_interval),
            clock,
        }
    }

    fn series(&self, host: &str, metric: &str) -> SeriesRef {
        if let Some(series) = self.lookup(host, metric) {
            return series;
        }
        let mut index = self.index.write();
        index
            .entry(host.to_string())
            .or_default()
            .entry(metric.to_string())
            .or_default()
            .clone()
    }
    fn lookup(&self, host: &str, metric: &str) -> Option<SeriesRef> {
        self.index
            .read()
            .get(host)
            .and_then(|metrics| metrics.get(metric))
            .cloned()
    }

    /// Inserts or overwrites the point at `(host, metric, time)`.
    pub fn add_point(&self, host: &str, metric: &str, time: Time, value: f64, unit: &str) {
        let series = self.series(host, metric);
        let now = self.clock.now();
        let mut series = series.lock();
        series.insert(time, PointValue::new(value, unit));
        let report = series.maintain(now, self.retention, self.aggregation_interval);
        if report != Maintenance::default() {
            trace!(
                host,
                metric,
                evicted = report.evicted,
                collapsed = report.collapsed,
                buckets = report.buckets,
                "series maintained"
            );
        }
    }

    /// Points in `[from, to)` in ascending time order.
    pub fn query(&self, host: &str, metric: &str, from: Time, to: Time) -> Vec<Point> {
        let Some(series) = self.lookup(host, metric) else {
            return vec![];
        };
        let series = series.lock();
        series.span(from, to).collect()
    }

    pub fn query_by_host(
        &self,
        host: &str,
        from: Time,
        to: Time,
    ) -> BTreeMap<MetricKey, Vec<Point>> {
        let series: Vec<(MetricKey, SeriesRef)> = match self.index.read().get(host) {
            Some(metrics) => metrics
                .iter()
                .map(|(name, series)| (name.clone(), series.clone()))
                .collect(),
            None => vec![],
        };
        series
            .into_iter()
            .map(|(name, series)| {
                let points: Vec<Point> = series.lock().span(from, to).collect();
                (name, points)
            })
            .collect()
    }

    /// Recomputes fixed-width buckets over every retained point of every key.
    pub fn aggregated_view<F>(&self, bucket_size: BucketSize, aggregator: F) -> AggregatedView
    where
        F: Fn(&[PointValue]) -> Option<PointValue>,
    {
        let snapshot: Vec<(String, MetricKey, SeriesRef)> = {
            let index = self.index.read();
            index
                .iter()
                .flat_map(|(host, metrics)| {
                    metrics
                        .iter()
                        .map(|(name, series)| (host.clone(), name.clone(), series.clone()))
                })
                .collect()
        };
        let mut view = AggregatedView::new();
        for (host, name, series) in snapshot {
            let mut buckets: BTreeMap<Time, Vec<PointValue>> = BTreeMap::new();
            for (time, value) in series.lock().iter() {
                buckets
                    .entry(bucket_size.floor(time))
                    .or_default()
                    .push(value.clone());
            }
            let aggregated = buckets
                .into_iter()
                .filter_map(|(start, values)| aggregator(&values).map(|v| (start, v)))
                .collect();
            view.entry(host).or_default().insert(name, aggregated);
        }
        view
    }

    /// Every host ever written to, including ones whose points have all
    /// been evicted.
    pub fn hosts(&self) -> BTreeSet<String> {
        self.index.read().keys().cloned().collect()
    }
    pub fn metric_names(&self) -> BTreeSet<MetricKey> {
        self.index
            .read()
            .values()
            .flat_map(|metrics| metrics.keys().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{aggregate::Aggregation, clock::ManualClock};

    fn store(retention: u64, aggregation: u64, clock: Arc<ManualClock>) -> TimeSeriesStore {
        let config = StoreConfig {
            retention: Duration::from_secs(retention),
            aggregation_interval: Duration::from_secs(aggregation),
        };
        TimeSeriesStore::new(config, clock)
    }

    fn values(points: &[Point]) -> Vec<(Time, f64)> {
        points.iter().map(|p| (p.time, p.value)).collect()
    }

    #[test]
    fn query_returns_points_in_order() {
        let clock = Arc::new(ManualClock::new(3000));
        let store = store(86400, 300, clock);
        for (time, value) in [(2900, 3.0), (2800, 1.0), (2850, 2.0)] {
            store.add_point("h1", "cpu", time, value, "%");
        }
        let points = store.query("h1", "cpu", 0, 3000);
        assert_eq!(values(&points), [(2800, 1.0), (2850, 2.0), (2900, 3.0)]);
    }

    #[test]
    fn last_write_wins() {
        let clock = Arc::new(ManualClock::new(1000));
        let store = store(86400, 300, clock);
        store.add_point("h1", "cpu", 990, 1.0, "%");
        store.add_point("h1", "cpu", 990, 2.0, "%");
        let points = store.query("h1", "cpu", 0, 1000);
        assert_eq!(values(&points), [(990, 2.0)]);
    }

    #[test]
    fn unknown_keys_and_empty_ranges_are_empty() {
        let clock = Arc::new(ManualClock::new(1000));
        let store = store(86400, 300, clock);
        store.add_point("h1", "cpu", 990, 1.0, "%");
        assert!(store.query("h2", "cpu", 0, 1000).is_empty());
        assert!(store.query("h1", "mem", 0, 1000).is_empty());
        assert!(store.query("h1", "cpu", 500, 500).is_empty());
        assert!(store.query("h1", "cpu", 1000, 0).is_empty());
        assert!(store.query_by_host("h2", 0, 1000).is_empty());
    }

    #[test]
    fn retention_evicts_on_next_write() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(10, 5, clock.clone());
        store.add_point("h1", "cpu", 0, 1.0, "%");
        assert_eq!(store.query("h1", "cpu", 0, 1).len(), 1);

        clock.set(11);
        store.add_point("h1", "cpu", 11, 2.0, "%");
        let points = store.query("h1", "cpu", 0, 12);
        assert_eq!(values(&points), [(11, 2.0)]);
    }

    #[test]
    fn aged_buckets_collapse_to_mean() {
        let clock = Arc::new(ManualClock::new(1000));
        let store = store(10_000, 60, clock.clone());
        store.add_point("h1", "cpu", 600, 10.0, "%");
        store.add_point("h1", "cpu", 610, 20.0, "pct");
        store.add_point("h1", "cpu", 720, 5.0, "%");
        store.add_point("h1", "cpu", 990, 7.0, "%");
        let points = store.query("h1", "cpu", 0, 1000);
        assert_eq!(values(&points), [(600, 15.0), (720, 5.0), (990, 7.0)]);
        assert_eq!(points[0].unit, "%");
    }

    #[test]
    fn bucket_collapsed_while_aging_keeps_true_mean() {
        let clock = Arc::new(ManualClock::new(240));
        let store = store(86400, 300, clock.clone());
        for (i, t) in (0..=240).step_by(60).enumerate() {
            store.add_point("h1", "cpu", t, 10.0 * (i + 1) as f64, "%");
        }
        for now in (300..=660).step_by(60) {
            clock.set(now);
            store.add_point("h1", "cpu", now, 1.0, "%");
        }
        let points = store.query("h1", "cpu", 0, 300);
        assert_eq!(values(&points), [(0, 30.0)]);
    }

    #[test]
    fn query_by_host_groups_by_metric() {
        let clock = Arc::new(ManualClock::new(100));
        let store = store(86400, 300, clock);
        store.add_point("h1", "cpu", 50, 1.0, "%");
        store.add_point("h1", "memory_free", 50, 512.0, "MB");
        store.add_point("h2", "cpu", 50, 9.0, "%");
        let by_host = store.query_by_host("h1", 0, 100);
        assert_eq!(by_host.len(), 2);
        assert_eq!(values(&by_host["cpu"]), [(50, 1.0)]);
        assert_eq!(values(&by_host["memory_free"]), [(50, 512.0)]);
    }

    #[test]
    fn aggregated_view_recomputes_whole_series() {
        let clock = Arc::new(ManualClock::new(100));
        let store = store(86400, 300, clock);
        for (time, value) in [(0, 1.0), (30, 3.0), (60, 10.0)] {
            store.add_point("h1", "cpu", time, value, "%");
        }
        let bucket = BucketSize::from_secs(60).unwrap();
        let view = store.aggregated_view(bucket, |points| Aggregation::Max.reduce(points));
        let cpu = &view["h1"]["cpu"];
        assert_eq!(cpu[&0].value, 3.0);
        assert_eq!(cpu[&60].value, 10.0);
        assert_eq!(cpu.len(), 2);
    }

    #[test]
    fn listings_survive_eviction() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(10, 5, clock.clone());
        store.add_point("h1", "cpu", 0, 1.0, "%");
        clock.set(100);
        store.add_point("h1", "cpu", 0, 1.0, "%");
        assert!(store.query("h1", "cpu", 0, 100).is_empty());
        assert_eq!(store.hosts(), BTreeSet::from(["h1".to_string()]));
        assert_eq!(store.metric_names(), BTreeSet::from(["cpu".to_string()]));
    }

    #[test]
    fn concurrent_writers() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(store(86400, 86400, clock));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                thread::spawn(move || {
                    let host = format!("h{}", worker % 2);
                    for i in 0..250 {
                        store.add_point(&host, "cpu", worker * 1000 + i, i as f64, "%");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.query("h0", "cpu", 0, 10_000).len(), 500);
        assert_eq!(store.query("h1", "cpu", 0, 10_000).len(), 500);
        let points = store.query("h0", "cpu", 0, 10_000);
        assert!(points.windows(2).all(|w| w[0].time < w[1].time));
    }
}
