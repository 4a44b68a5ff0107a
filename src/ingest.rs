use tracing::debug;

use crate::{codec::HostPayload, store::TimeSeriesStore};

/// Writes every point of `payload` into `store`; returns how many.
pub fn ingest(store: &TimeSeriesStore, payload: &HostPayload) -> usize {
    let mut n = 0;
    for (metric, points) in &payload.metrics {
        for point in points {
            store.add_point(&payload.host, metric, point.t, point.v, &point.u);
            n += 1;
        }
    }
    debug!(host = %payload.host, points = n, "ingested");
    n
}
