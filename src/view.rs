use plotly::{
    layout::{Axis, AxisType},
    Layout, Plot, Scatter,
};

use crate::{series::Point, store::TimeSeriesStore, Time};

const MAX_DISPLAY_DATA_POINTS: usize = 1024;

/// Renders the given metrics of one host as an inline plotly scatter chart.
/// Long ranges are thinned to roughly [`MAX_DISPLAY_DATA_POINTS`] points in
/// total by keeping the last point of each chunk.
pub fn scatter_chart_html(
    store: &TimeSeriesStore,
    host: &str,
    metrics: impl Iterator<Item = impl AsRef<str>>,
    time_range: core::ops::Range<Time>,
    value_range: Option<(f64, f64)>,
    div_id: Option<&str>,
) -> String {
    let mut data_point_count = 0;
    let mut data_sets = vec![];
    for metric in metrics {
        let points = store.query(host, metric.as_ref(), time_range.start, time_range.end);
        if points.is_empty() {
            continue;
        }
        data_point_count += points.len();
        data_sets.push((metric, points));
    }
    let chunk_size = data_point_count.div_ceil(MAX_DISPLAY_DATA_POINTS).max(1);
    let mut plot = Plot::new();
    for (metric, points) in data_sets {
        let (x, y) = thin(&points, chunk_size);
        let trace = Scatter::new(x, y).name(metric.as_ref());
        plot.add_trace(trace);
    }
    let y = Axis::default().title("value");
    let y = match value_range {
        Some(range) => y.range(vec![range.0, range.1]),
        None => y,
    };
    let layout = Layout::default()
        .x_axis(Axis::default().title("time").type_(AxisType::Date))
        .y_axis(y);
    plot.set_layout(layout);
    plot.to_inline_html(div_id)
}

/// Date axes take milliseconds.
fn thin(points: &[Point], chunk_size: usize) -> (Vec<i64>, Vec<f64>) {
    points
        .chunks(chunk_size)
        .filter_map(|chunk| chunk.last())
        .map(|p| (p.time.saturating_mul(1000), p.value))
        .unzip()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{clock::ManualClock, store::StoreConfig};

    fn point(time: Time, value: f64) -> Point {
        Point {
            time,
            value,
            unit: "%".to_string(),
        }
    }

    #[test]
    fn thinning_keeps_last_of_each_chunk() {
        let points: Vec<Point> = (0..5).map(|t| point(t, t as f64)).collect();
        let (x, y) = thin(&points, 2);
        assert_eq!(x, [1000, 3000, 4000]);
        assert_eq!(y, [1.0, 3.0, 4.0]);
    }

    #[test]
    fn chart_names_each_metric() {
        let store = TimeSeriesStore::new(StoreConfig::default(), Arc::new(ManualClock::new(100)));
        store.add_point("h1", "cpu", 10, 50.0, "%");
        store.add_point("h1", "memory_free", 10, 512.0, "MB");
        let html = scatter_chart_html(
            &store,
            "h1",
            ["cpu", "memory_free", "missing"].iter(),
            0..100,
            None,
            Some("chart"),
        );
        assert!(html.contains("memory_free"));
        assert!(html.contains("chart"));
        assert!(!html.contains("missing"));
    }
}
