use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Time;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointValue {
    pub value: f64,
    pub unit: String,
}
impl PointValue {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub time: Time,
    pub value: f64,
    pub unit: String,
}

/// What one maintenance pass did to a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Maintenance {
    pub evicted: usize,
    pub collapsed: usize,
    pub buckets: usize,
}

/// A stored point and the number of raw points it stands for.
#[derive(Debug, Clone, PartialEq)]
struct Slot {
    value: PointValue,
    weight: u64,
}
impl Slot {
    fn raw(value: PointValue) -> Self {
        Self { value, weight: 1 }
    }
}

/// Points of one `(host, metric)` key, ascending by time, one per timestamp.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    points: BTreeMap<Time, Slot>,
}
impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the value previously stored at `time`, if any.
    pub fn insert(&mut self, time: Time, value: PointValue) -> Option<PointValue> {
        self.points
            .insert(time, Slot::raw(value))
            .map(|slot| slot.value)
    }

    /// Points in `[from, to)`.
    pub fn span(&self, from: Time, to: Time) -> impl Iterator<Item = Point> + '_ {
        let range = (from < to).then_some(from..to);
        range
            .into_iter()
            .flat_map(|range| self.points.range(range))
            .map(|(&time, slot)| Point {
                time,
                value: slot.value.value,
                unit: slot.value.unit.clone(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (Time, &PointValue)> + '_ {
        self.points.iter().map(|(&time, slot)| (time, &slot.value))
    }

    /// Drops every point older than `cutoff`.
    pub fn evict_before(&mut self, cutoff: Time) -> usize {
        let kept = self.points.split_off(&cutoff);
        let evicted = self.points.len();
        self.points = kept;
        evicted
    }

    /// Collapses each `interval`-wide bucket of points older than `horizon`
    /// into a single mean point at the bucket floor. Buckets holding one
    /// point are left alone.
    ///
    /// An aggregate counts as many raw points as it replaced, so a bucket
    /// that ages one point at a time still ends at the mean of all of them.
    pub fn downsample(&mut self, horizon: Time, interval: Time) -> Maintenance {
        let mut report = Maintenance::default();
        if interval <= 0 {
            return report;
        }
        let recent = self.points.split_off(&horizon);
        let aged = std::mem::replace(&mut self.points, recent);

        let mut buckets: BTreeMap<Time, Vec<(Time, Slot)>> = BTreeMap::new();
        for (time, slot) in aged {
            buckets
                .entry(floor(time, interval))
                .or_default()
                .push((time, slot));
        }
        for (start, bucket) in buckets {
            let n = bucket.len();
            if n == 1 {
                self.points.extend(bucket);
                continue;
            }
            let weight: u64 = bucket.iter().map(|(_, slot)| slot.weight).sum();
            let total: f64 = bucket
                .iter()
                .map(|(_, slot)| slot.value.value * slot.weight as f64)
                .sum();
            let unit = bucket[0].1.value.unit.clone();
            let mean = PointValue::new(total / weight as f64, unit);
            self.points.insert(start, Slot { value: mean, weight });
            report.collapsed += n;
            report.buckets += 1;
        }
        report
    }

    /// Retention eviction followed by downsampling, relative to `now`.
    pub fn maintain(
        &mut self,
        now: Time,
        retention: Time,
        aggregation_interval: Time,
    ) -> Maintenance {
        let evicted = self.evict_before(now.saturating_sub(retention));
        let horizon = now.saturating_sub(aggregation_interval);
        let mut report = self.downsample(horizon, aggregation_interval);
        report.evicted = evicted;
        report
    }
}

fn floor(time: Time, interval: Time) -> Time {
    time - time.rem_euclid(interval)
}
