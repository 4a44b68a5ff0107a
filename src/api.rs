//! HTTP surface of the collector.
//!
//! - `POST /metrics` ingests one host payload
//! - `GET /metrics?host&metric&from&to` range query, one metric or all of a host
//! - `GET /metrics/hosts`, `GET /metrics/names`
//! - `GET /metrics/aggregate?bucket&fn` read-time aggregated view
//! - `GET /chart?host&metrics&from&to` scatter chart page

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use hyped::*;
use poem::{
    error::BadRequest,
    get, handler,
    middleware::AddData,
    web::{Data, Html, Json, Query},
    Endpoint, EndpointExt, Route,
};
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{Aggregation, BucketSize},
    clock::Clock,
    codec::HostPayload,
    ingest::ingest,
    series::Point,
    store::{AggregatedView, TimeSeriesStore},
    view::scatter_chart_html,
    MetricKey, Time,
};

/// Window used when a query names no `from`.
const DEFAULT_LOOKBACK: Time = 60 * 60;
const DEFAULT_BUCKET: &str = "5m";
const PLOTLY_JS: &str = "https://cdn.plot.ly/plotly-2.12.1.min.js";

#[derive(Debug)]
pub struct AppState {
    pub store: Arc<TimeSeriesStore>,
    pub clock: Arc<dyn Clock>,
}
impl AppState {
    /// `to` defaults to now, `from` to one hour before `to`.
    fn window(&self, from: Option<Time>, to: Option<Time>) -> (Time, Time) {
        let to = to.unwrap_or_else(|| self.clock.now());
        let from = from.unwrap_or(to.saturating_sub(DEFAULT_LOOKBACK));
        (from, to)
    }
}

pub fn app(state: Arc<AppState>) -> impl Endpoint {
    Route::new()
        .at("/metrics", get(query_range).post(ingest_payload))
        .at("/metrics/hosts", get(hosts))
        .at("/metrics/names", get(metric_names))
        .at("/metrics/aggregate", get(aggregate))
        .at("/chart", get(chart))
        .with(AddData::new(state))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub points: usize,
}

#[handler]
async fn ingest_payload(
    payload: Json<HostPayload>,
    state: Data<&Arc<AppState>>,
) -> Json<IngestResponse> {
    let points = ingest(&state.store, &payload);
    Json(IngestResponse { points })
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    host: String,
    metric: Option<String>,
    from: Option<Time>,
    to: Option<Time>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RangeResponse {
    Series(Vec<Point>),
    ByMetric(BTreeMap<MetricKey, Vec<Point>>),
}

#[handler]
async fn query_range(
    query: Query<RangeQuery>,
    state: Data<&Arc<AppState>>,
) -> Json<RangeResponse> {
    let (from, to) = state.window(query.from, query.to);
    let store = &state.store;
    Json(match &query.metric {
        Some(metric) => RangeResponse::Series(store.query(&query.host, metric, from, to)),
        None => RangeResponse::ByMetric(store.query_by_host(&query.host, from, to)),
    })
}

#[handler]
async fn hosts(state: Data<&Arc<AppState>>) -> Json<BTreeSet<String>> {
    Json(state.store.hosts())
}

#[handler]
async fn metric_names(state: Data<&Arc<AppState>>) -> Json<BTreeSet<MetricKey>> {
    Json(state.store.metric_names())
}

#[derive(Debug, Deserialize)]
struct AggregateQuery {
    bucket: Option<String>,
    #[serde(rename = "fn")]
    function: Option<String>,
}

#[handler]
async fn aggregate(
    query: Query<AggregateQuery>,
    state: Data<&Arc<AppState>>,
) -> poem::Result<Json<AggregatedView>> {
    let bucket: BucketSize = query
        .bucket
        .as_deref()
        .unwrap_or(DEFAULT_BUCKET)
        .parse()
        .map_err(BadRequest)?;
    let function = match query.function.as_deref() {
        Some(name) => name.parse::<Aggregation>().map_err(BadRequest)?,
        None => Aggregation::default(),
    };
    let view = state
        .store
        .aggregated_view(bucket, |points| function.reduce(points));
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
struct ChartQuery {
    host: String,
    metrics: String,
    from: Option<Time>,
    to: Option<Time>,
}

#[handler]
async fn chart(query: Query<ChartQuery>, state: Data<&Arc<AppState>>) -> Html<String> {
    let (from, to) = state.window(query.from, query.to);
    let metrics = query.metrics.split(',').filter(|m| !m.is_empty());
    let chart = scatter_chart_html(&state.store, &query.host, metrics, from..to, None, None);
    let chart = danger(chart);
    let plotly = script(()).src(PLOTLY_JS);
    let root_div = div((plotly, chart));
    let body = hyped::body(root_div);
    let root = (doctype(), html(body));
    Html(render(root))
}

#[cfg(test)]
mod tests {
    use poem::{http::StatusCode, test::TestClient};
    use serde_json::json;

    use super::*;
    use crate::{clock::ManualClock, store::StoreConfig};

    fn client(now: Time) -> (TestClient<impl Endpoint>, Arc<TimeSeriesStore>) {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(TimeSeriesStore::new(StoreConfig::default(), clock.clone()));
        let state = Arc::new(AppState {
            store: store.clone(),
            clock,
        });
        (TestClient::new(app(state)), store)
    }

    fn payload() -> serde_json::Value {
        json!({
            "host": "h1",
            "metrics": {
                "cpu": [{"t": 1000, "v": 75, "u": "%"}, {"t": 2000, "v": 80, "u": "%"}],
                "memory_free": [{"t": 1000, "v": 512.5, "u": "MB"}]
            }
        })
    }

    #[tokio::test]
    async fn posted_payload_is_queryable() {
        let (cli, _) = client(3000);
        let resp = cli.post("/metrics").body_json(&payload()).send().await;
        resp.assert_status_is_ok();
        resp.assert_json(json!({"points": 3})).await;

        let resp = cli
            .get("/metrics?host=h1&metric=cpu&from=0&to=3000")
            .send()
            .await;
        resp.assert_status_is_ok();
        resp.assert_json(json!([
            {"time": 1000, "value": 75.0, "unit": "%"},
            {"time": 2000, "value": 80.0, "unit": "%"}
        ]))
        .await;
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let (cli, store) = client(3000);
        let resp = cli
            .post("/metrics")
            .content_type("application/json")
            .body("{\"host\":")
            .send()
            .await;
        assert!(resp.0.status().is_client_error());
        assert!(store.hosts().is_empty());
    }

    #[tokio::test]
    async fn range_defaults_to_last_hour() {
        let (cli, store) = client(10_000);
        store.add_point("h1", "cpu", 10_000 - 4000, 1.0, "%");
        store.add_point("h1", "cpu", 10_000 - 100, 2.0, "%");
        let resp = cli.get("/metrics?host=h1&metric=cpu").send().await;
        resp.assert_json(json!([{"time": 9900, "value": 2.0, "unit": "%"}]))
            .await;
    }

    #[tokio::test]
    async fn range_without_metric_returns_all_of_host() {
        let (cli, _) = client(3000);
        cli.post("/metrics").body_json(&payload()).send().await;
        let resp = cli.get("/metrics?host=h1&from=0&to=1500").send().await;
        resp.assert_json(json!({
            "cpu": [{"time": 1000, "value": 75.0, "unit": "%"}],
            "memory_free": [{"time": 1000, "value": 512.5, "unit": "MB"}]
        }))
        .await;
    }

    #[tokio::test]
    async fn listings() {
        let (cli, store) = client(3000);
        store.add_point("h2", "cpu", 1000, 1.0, "%");
        cli.post("/metrics").body_json(&payload()).send().await;
        cli.get("/metrics/hosts")
            .send()
            .await
            .assert_json(json!(["h1", "h2"]))
            .await;
        cli.get("/metrics/names")
            .send()
            .await
            .assert_json(json!(["cpu", "memory_free"]))
            .await;
    }

    #[tokio::test]
    async fn aggregate_view() {
        let (cli, store) = client(1000);
        store.add_point("h1", "cpu", 720, 10.0, "%");
        store.add_point("h1", "cpu", 780, 30.0, "%");
        store.add_point("h1", "cpu", 900, 5.0, "%");
        let resp = cli
            .get("/metrics/aggregate?bucket=5m&fn=max")
            .send()
            .await;
        resp.assert_status_is_ok();
        resp.assert_json(json!({
            "h1": {"cpu": {
                "600": {"value": 30.0, "unit": "%"},
                "900": {"value": 5.0, "unit": "%"}
            }}
        }))
        .await;
    }

    #[tokio::test]
    async fn aggregate_rejects_bad_parameters() {
        let (cli, _) = client(1000);
        cli.get("/metrics/aggregate?bucket=5w")
            .send()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        cli.get("/metrics/aggregate?bucket=0m")
            .send()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        cli.get("/metrics/aggregate?fn=median")
            .send()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chart_page_embeds_plot() {
        let (cli, store) = client(3000);
        store.add_point("h1", "cpu", 2500, 40.0, "%");
        let resp = cli.get("/chart?host=h1&metrics=cpu").send().await;
        resp.assert_status_is_ok();
        let body = resp.0.into_body().into_string().await.unwrap();
        assert!(body.contains(PLOTLY_JS));
        assert!(body.contains("cpu"));
    }
}
