//! JSON wire format shared by the exporter and the collector:
//!
//! ```json
//! { "host": "h1", "metrics": { "cpu": [ { "t": 1000, "v": 75, "u": "%" } ] } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

use crate::{MetricKey, Sample, Time};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostPayload {
    pub host: String,
    pub metrics: BTreeMap<MetricKey, Vec<WirePoint>>,
}
impl HostPayload {
    /// Groups `samples` by metric name; per-name order is kept.
    pub fn from_samples(host: impl Into<String>, samples: &[Sample]) -> Self {
        let mut metrics: BTreeMap<MetricKey, Vec<WirePoint>> = BTreeMap::new();
        for sample in samples {
            metrics.entry(sample.name.clone()).or_default().push(WirePoint {
                t: sample.time,
                v: sample.value,
                u: sample.unit.clone(),
            });
        }
        Self {
            host: host.into(),
            metrics,
        }
    }

    pub fn point_count(&self) -> usize {
        self.metrics.values().map(Vec::len).sum()
    }

    pub fn into_samples(self) -> impl Iterator<Item = Sample> {
        let host = self.host;
        self.metrics.into_iter().flat_map(move |(name, points)| {
            let host = host.clone();
            points
                .into_iter()
                .map(move |p| Sample::new(name.clone(), p.v, p.u, host.clone(), p.t))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    pub t: Time,
    #[serde(serialize_with = "serialize_value")]
    pub v: f64,
    pub u: String,
}

/// Rounds to one decimal digit; non-finite values become zero.
pub fn round_value(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 10.0).round() / 10.0
}

fn serialize_value<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let value = round_value(*value);
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(value as i64)
    } else {
        serializer.serialize_f64(value)
    }
}

pub fn encode_group(host: &str, samples: &[Sample]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&HostPayload::from_samples(host, samples))
}
pub fn decode_payload(buf: &[u8]) -> serde_json::Result<HostPayload> {
    serde_json::from_slice(buf)
}
