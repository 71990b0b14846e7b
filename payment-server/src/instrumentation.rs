//! Prometheus instrumentation for HTTP traffic
//!
//! Every request is counted in flight while it is being served, and its
//! latency and request size are observed once it completes. Sizes count
//! the body bytes actually transferred; a streamed response is observed
//! when its body has been written.
//! Labels use the matched route name, never the raw path, so unmatched
//! requests collapse into the `other` route.

use crate::transport::RouteMatcher;
use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::{self, Next},
    response::Response,
    Router,
};
use metrics::{describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Request latency histogram
pub const HTTP_LATENCY: &str = "http_request_duration_seconds";

/// In-flight request gauge
pub const HTTP_REQUEST_ACTIVE: &str = "http_request_active";

/// Request body size histogram
pub const HTTP_REQUEST_SIZE_BYTES: &str = "http_request_size_bytes";

/// Response body size histogram
pub const HTTP_RESPONSE_SIZE_BYTES: &str = "http_response_size_bytes";

/// Route label used when no route matches
pub const UNMATCHED_ROUTE: &str = "other";

/// Latency buckets in seconds
pub const DEFAULT_LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// `count` buckets starting at `start`, each `factor` times the previous
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Vec<f64> {
    std::iter::successors(Some(start), |bound| Some(bound * factor))
        .take(count)
        .collect()
}

/// The HTTP metric family, backed by its own Prometheus recorder
pub struct HttpMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl HttpMetrics {
    /// Create the metric family and register its descriptions
    pub fn new() -> Result<Self, BuildError> {
        let size_buckets = exponential_buckets(100.0, 10.0, 6);

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(HTTP_LATENCY.to_string()),
                &DEFAULT_LATENCY_BUCKETS,
            )?
            .set_buckets_for_metric(
                Matcher::Full(HTTP_REQUEST_SIZE_BYTES.to_string()),
                &size_buckets,
            )?
            .set_buckets_for_metric(
                Matcher::Full(HTTP_RESPONSE_SIZE_BYTES.to_string()),
                &size_buckets,
            )?
            .build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_histogram!(HTTP_LATENCY, "Time (in seconds) spent serving HTTP requests.");
            describe_gauge!(
                HTTP_REQUEST_ACTIVE,
                "The number of HTTP requests currently being handled."
            );
            describe_histogram!(
                HTTP_REQUEST_SIZE_BYTES,
                "Size of HTTP request bodies in bytes."
            );
            describe_histogram!(
                HTTP_RESPONSE_SIZE_BYTES,
                "Size of HTTP response bodies in bytes."
            );
        });

        Ok(Self { recorder, handle })
    }

    /// Render the family in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn observe_latency(
        &self,
        method: &str,
        route: &str,
        status_code: u16,
        is_websocket: bool,
        seconds: f64,
    ) {
        metrics::with_local_recorder(&self.recorder, || {
            histogram!(
                HTTP_LATENCY,
                "method" => method.to_string(),
                "path" => route.to_string(),
                "status_code" => status_code.to_string(),
                "isWS" => is_websocket.to_string()
            )
            .record(seconds);
        });
    }

    pub fn observe_request_size(&self, method: &str, route: &str, bytes: u64) {
        self.observe_size(HTTP_REQUEST_SIZE_BYTES, method, route, bytes);
    }

    pub fn observe_response_size(&self, method: &str, route: &str, bytes: u64) {
        self.observe_size(HTTP_RESPONSE_SIZE_BYTES, method, route, bytes);
    }

    fn observe_size(&self, name: &'static str, method: &str, route: &str, bytes: u64) {
        metrics::with_local_recorder(&self.recorder, || {
            histogram!(
                name,
                "method" => method.to_string(),
                "handler" => route.to_string()
            )
            .record(bytes as f64);
        });
    }

    fn adjust_in_flight(&self, method: &str, route: &str, delta: f64) {
        metrics::with_local_recorder(&self.recorder, || {
            gauge!(
                HTTP_REQUEST_ACTIVE,
                "method" => method.to_string(),
                "path" => route.to_string()
            )
            .increment(delta);
        });
    }
}

/// Holds a request in the in-flight gauge until dropped
struct InFlight {
    metrics: Arc<HttpMetrics>,
    method: String,
    route: String,
}

impl InFlight {
    fn start(metrics: Arc<HttpMetrics>, method: String, route: String) -> Self {
        metrics.adjust_in_flight(&method, &route, 1.0);
        Self {
            metrics,
            method,
            route,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.metrics.adjust_in_flight(&self.method, &self.route, -1.0);
    }
}

/// Decorates a router with the HTTP metric family
#[derive(Clone)]
pub struct Instrument {
    metrics: Arc<HttpMetrics>,
    matcher: Arc<dyn RouteMatcher>,
}

impl Instrument {
    pub fn new(metrics: Arc<HttpMetrics>, matcher: Arc<dyn RouteMatcher>) -> Self {
        Self { metrics, matcher }
    }

    /// Wrap every route, and the fallback, of `router`
    pub fn wrap(self, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self, instrument))
    }

    fn route_for(&self, request: &Request) -> String {
        self.matcher
            .route_name(request.method(), request.uri().path())
            .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
    }
}

async fn instrument(State(instrument): State<Instrument>, request: Request, next: Next) -> Response {
    let method = request.method().as_str().to_string();
    let route = instrument.route_for(&request);
    let is_websocket = is_websocket_upgrade(request.headers());

    let declared_size = body_size(request.body());
    let read = Arc::new(AtomicU64::new(0));
    let request = request.map(|body| {
        let read = read.clone();
        Body::new(body.map_frame(move |frame| {
            if let Some(data) = frame.data_ref() {
                read.fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            frame
        }))
    });

    let in_flight = InFlight::start(instrument.metrics.clone(), method.clone(), route.clone());
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed().as_secs_f64();
    let metrics = &instrument.metrics;
    let request_size = read.load(Ordering::Relaxed).max(declared_size);
    metrics.observe_request_size(&method, &route, request_size);
    metrics.observe_latency(
        &method,
        &route,
        response.status().as_u16(),
        is_websocket,
        elapsed,
    );
    drop(in_flight);

    match response.body().size_hint().exact() {
        Some(size) => {
            metrics.observe_response_size(&method, &route, size);
            response
        }
        None => {
            let mut written = ResponseSize {
                metrics: metrics.clone(),
                method,
                route,
                bytes: 0,
            };
            response.map(|body| {
                Body::new(body.map_frame(move |frame| {
                    if let Some(data) = frame.data_ref() {
                        written.bytes += data.len() as u64;
                    }
                    frame
                }))
            })
        }
    }
}

/// Observes a streamed response's size once its body is dropped
struct ResponseSize {
    metrics: Arc<HttpMetrics>,
    method: String,
    route: String,
    bytes: u64,
}

impl Drop for ResponseSize {
    fn drop(&mut self) {
        self.metrics
            .observe_response_size(&self.method, &self.route, self.bytes);
    }
}

fn body_size<B: HttpBody>(body: &B) -> u64 {
    let hint = body.size_hint();
    hint.exact().unwrap_or_else(|| hint.lower())
}

/// True for a websocket upgrade handshake
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let header_has = |name: header::HeaderName, token: &str| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|part| part.trim().eq_ignore_ascii_case(token))
    };

    header_has(header::UPGRADE, "websocket") && header_has(header::CONNECTION, "upgrade")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RouteTable;
    use axum::{
        body::Body,
        http::{HeaderValue, Method, StatusCode},
        routing::{get, post},
    };
    use axum::body::to_bytes;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use tower_http::catch_panic::CatchPanicLayer;

    /// Value of the first sample of `metric` carrying every label in `labels`
    fn sample(rendered: &str, metric: &str, labels: &[(&str, &str)]) -> Option<f64> {
        rendered
            .lines()
            .filter(|line| line.starts_with(&format!("{}{{", metric)))
            .find(|line| {
                labels
                    .iter()
                    .all(|(k, v)| line.contains(&format!("{}=\"{}\"", k, v)))
            })
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    /// A body without a known length, one chunk per tick
    fn chunked(chunks: &'static [&'static str]) -> Body {
        let stream = futures_util::stream::iter(chunks.iter().copied()).then(|chunk| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, std::io::Error>(chunk)
        });
        Body::from_stream(stream)
    }

    async fn explode() -> &'static str {
        panic!("handler blew up")
    }

    fn test_router(metrics: Arc<HttpMetrics>) -> Router {
        let routes = RouteTable::new()
            .with_route(Method::GET, "/ok", "ok")
            .with_route(Method::POST, "/echo", "echo")
            .with_route(Method::GET, "/fail", "fail")
            .with_route(Method::GET, "/panic", "panic")
            .with_route(Method::GET, "/stream", "stream");

        let router = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route("/echo", post(|body: String| async move { body }))
            .route("/fail", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/panic", get(explode))
            .route("/stream", get(|| async { chunked(&["abc", "de"]) }))
            .layer(CatchPanicLayer::new());

        Instrument::new(metrics, Arc::new(routes)).wrap(router)
    }

    async fn dispatch(router: &Router, method: Method, uri: &str, body: Body) -> Response {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap();
        router.clone().oneshot(request).await.unwrap()
    }

    async fn send(router: &Router, method: Method, uri: &str, body: &'static str) -> StatusCode {
        dispatch(router, method, uri, Body::from(body)).await.status()
    }

    #[test]
    fn test_exponential_buckets() {
        assert_eq!(
            exponential_buckets(100.0, 10.0, 6),
            vec![100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0]
        );
        assert!(exponential_buckets(1.0, 2.0, 0).is_empty());
    }

    #[test]
    fn test_websocket_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(!is_websocket_upgrade(&headers));

        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_websocket_upgrade(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));
    }

    #[tokio::test]
    async fn test_successful_request_is_observed() {
        let metrics = Arc::new(HttpMetrics::new().unwrap());
        let router = test_router(metrics.clone());

        assert_eq!(send(&router, Method::GET, "/ok", "").await, StatusCode::OK);

        let rendered = metrics.render();
        let labels = [("method", "GET"), ("path", "ok"), ("status_code", "200"), ("isWS", "false")];
        assert_eq!(
            sample(&rendered, "http_request_duration_seconds_count", &labels),
            Some(1.0)
        );
        assert_eq!(
            sample(&rendered, HTTP_REQUEST_ACTIVE, &[("method", "GET"), ("path", "ok")]),
            Some(0.0)
        );
        assert!(rendered.contains("# HELP http_request_duration_seconds"));
    }

    #[tokio::test]
    async fn test_sizes_are_observed() {
        let metrics = Arc::new(HttpMetrics::new().unwrap());
        let router = test_router(metrics.clone());

        assert_eq!(send(&router, Method::POST, "/echo", "0123456789").await, StatusCode::OK);

        let rendered = metrics.render();
        let labels = [("method", "POST"), ("handler", "echo")];
        assert_eq!(
            sample(&rendered, "http_request_size_bytes_sum", &labels),
            Some(10.0)
        );
        assert_eq!(
            sample(&rendered, "http_response_size_bytes_sum", &labels),
            Some(10.0)
        );
    }

    #[tokio::test]
    async fn test_chunked_request_size_counts_bytes_read() {
        let metrics = Arc::new(HttpMetrics::new().unwrap());
        let router = test_router(metrics.clone());

        let response = dispatch(&router, Method::POST, "/echo", chunked(&["01234", "56789"])).await;
        assert_eq!(response.status(), StatusCode::OK);

        let rendered = metrics.render();
        let labels = [("method", "POST"), ("handler", "echo")];
        assert_eq!(
            sample(&rendered, "http_request_size_bytes_sum", &labels),
            Some(10.0)
        );
        assert_eq!(
            sample(&rendered, "http_response_size_bytes_sum", &labels),
            Some(10.0)
        );
    }

    #[tokio::test]
    async fn test_streamed_response_size_observed_once_written() {
        let metrics = Arc::new(HttpMetrics::new().unwrap());
        let router = test_router(metrics.clone());

        let response = dispatch(&router, Method::GET, "/stream", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            sample(
                &metrics.render(),
                "http_response_size_bytes_count",
                &[("handler", "stream")]
            ),
            None
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abcde");

        let rendered = metrics.render();
        let labels = [("method", "GET"), ("handler", "stream")];
        assert_eq!(
            sample(&rendered, "http_response_size_bytes_sum", &labels),
            Some(5.0)
        );
        assert_eq!(
            sample(&rendered, "http_response_size_bytes_count", &labels),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_error_responses_are_observed() {
        let metrics = Arc::new(HttpMetrics::new().unwrap());
        let router = test_router(metrics.clone());

        assert_eq!(
            send(&router, Method::GET, "/fail", "").await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            send(&router, Method::GET, "/panic", "").await,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let rendered = metrics.render();
        for route in ["fail", "panic"] {
            let labels = [("path", route), ("status_code", "500")];
            assert_eq!(
                sample(&rendered, "http_request_duration_seconds_count", &labels),
                Some(1.0)
            );
            assert_eq!(
                sample(&rendered, HTTP_REQUEST_ACTIVE, &[("path", route)]),
                Some(0.0)
            );
        }
    }

    #[tokio::test]
    async fn test_unmatched_requests_share_one_label() {
        let metrics = Arc::new(HttpMetrics::new().unwrap());
        let router = test_router(metrics.clone());

        send(&router, Method::GET, "/nope/1", "").await;
        send(&router, Method::GET, "/nope/2", "").await;

        let rendered = metrics.render();
        assert_eq!(
            sample(
                &rendered,
                "http_request_duration_seconds_count",
                &[("path", UNMATCHED_ROUTE), ("status_code", "404")]
            ),
            Some(2.0)
        );
        assert!(!rendered.contains("nope"));
    }

    #[tokio::test]
    async fn test_families_are_isolated() {
        let first = Arc::new(HttpMetrics::new().unwrap());
        let second = Arc::new(HttpMetrics::new().unwrap());

        send(&test_router(first.clone()), Method::GET, "/ok", "").await;

        assert!(first.render().contains("http_request_duration_seconds_count"));
        assert!(!second.render().contains("http_request_duration_seconds_count"));
    }
}
