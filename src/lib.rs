pub mod aggregate;
pub mod api;
pub mod buf;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod exporter;
pub mod ingest;
pub mod sampler;
pub mod scheduler;
pub mod series;
pub mod store;
pub mod transport;
pub mod view;

pub use error::{Error, Result};

/// Seconds since the Unix epoch.
pub type Time = i64;
pub type MetricKey = String;

/// One reading stamped with its origin and collection time.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: MetricKey,
    pub value: f64,
    pub unit: String,
    pub host: String,
    pub time: Time,
}
impl Sample {
    pub fn new(
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        host: impl Into<String>,
        time: Time,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            host: host.into(),
            time,
        }
    }
}
