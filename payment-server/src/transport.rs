//! HTTP transport for the payment endpoints
//!
//! Binds methods and paths to endpoints, decodes request bodies into domain
//! requests and encodes endpoint results into HTTP responses. The route
//! table is kept alongside the axum router so instrumentation can resolve a
//! request to its route without dispatching it.

use crate::api::{HealthResponse, HealthStatus};
use crate::error::{ApiError, ApiResult};
use crate::instrumentation::HttpMetrics;
use crate::telemetry::extract_trace_context;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use payment_core::{
    AuthorisationRequest, AuthorisationResponse, Context, Endpoints, Envelope, PaymentError,
    AUTHORISE,
};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::debug;

/// Path of the authorise operation
pub const PAYMENT_AUTH_PATH: &str = "/paymentAuth";

/// Path of the health probe
pub const HEALTH_PATH: &str = "/health";

/// Path of the Prometheus exposition
pub const METRICS_PATH: &str = "/metrics";

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const HEALTH: &str = "health";
const METRICS: &str = "metrics";

/// A registered route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    pattern: String,
    name: String,
    operation: &'static str,
}

impl Route {
    pub fn new(method: Method, pattern: impl Into<String>, operation: &'static str) -> Self {
        let pattern = pattern.into();
        let name = route_label(&pattern);
        Self {
            method,
            pattern,
            name,
            operation,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Label-safe form of the pattern
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Segment-wise match; `:name` segments match any non-empty segment
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if &self.method != method {
            return false;
        }

        let mut expected = self.pattern.split('/');
        let mut actual = path.split('/');
        loop {
            match (expected.next(), actual.next()) {
                (None, None) => return true,
                (Some(want), Some(got)) => {
                    let wildcard = want.starts_with(':') && !got.is_empty();
                    if !wildcard && want != got {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

/// Resolves a request to a low-cardinality route name
pub trait RouteMatcher: Send + Sync {
    /// Name of the route serving `method path`, if any
    fn route_name(&self, method: &Method, path: &str) -> Option<String>;
}

/// Ordered set of routes; first match wins
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, method: Method, pattern: &str, operation: &'static str) -> Self {
        self.routes.push(Route::new(method, pattern, operation));
        self
    }

    /// Every registered route, in registration order
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn match_route(&self, method: &Method, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(method, path))
    }
}

impl RouteMatcher for RouteTable {
    fn route_name(&self, method: &Method, path: &str) -> Option<String> {
        self.match_route(method, path)
            .map(|route| route.name().to_string())
    }
}

/// Turn a path pattern into a metric label value.
///
/// Runs of non-alphanumeric characters become a single `_`, leading and
/// trailing separators are dropped and the result is lowercased. An empty
/// result (the root path) becomes `root`.
pub fn route_label(pattern: &str) -> String {
    let mut label = String::with_capacity(pattern.len());
    let mut separator = false;
    for c in pattern.chars() {
        if c.is_ascii_alphanumeric() {
            if separator && !label.is_empty() {
                label.push('_');
            }
            separator = false;
            label.push(c.to_ascii_lowercase());
        } else {
            separator = true;
        }
    }

    if label.is_empty() {
        "root".to_string()
    } else {
        label
    }
}

/// Transport settings supplied by the wiring layer
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Name reported by the health probe
    pub service_name: String,

    /// Deadline applied to each request context
    pub request_timeout: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            service_name: "payment".to_string(),
            request_timeout: None,
        }
    }
}

/// State shared by the HTTP handlers
#[derive(Clone)]
pub struct TransportState {
    endpoints: Arc<Endpoints>,
    parent: CancellationToken,
    metrics: Arc<HttpMetrics>,
    options: Arc<TransportOptions>,
    start_time: Instant,
}

impl TransportState {
    /// Per-request context: child of the parent token, bounded by the
    /// request timeout and parented on the caller's trace
    fn request_context(&self, headers: &HeaderMap) -> Context {
        let ctx = Context::new(self.parent.child_token())
            .with_trace_context(extract_trace_context(headers));
        match self.options.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

/// The payment router together with its route table
pub struct HttpTransport {
    router: Router,
    routes: Arc<RouteTable>,
}

impl HttpTransport {
    /// Route table for instrumentation and introspection
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Build the HTTP router for the given endpoints
pub fn make_http_handler(
    parent: CancellationToken,
    endpoints: Endpoints,
    metrics: Arc<HttpMetrics>,
    options: TransportOptions,
) -> HttpTransport {
    let routes = RouteTable::new()
        .with_route(Method::POST, PAYMENT_AUTH_PATH, AUTHORISE)
        .with_route(Method::GET, HEALTH_PATH, HEALTH)
        .with_route(Method::GET, METRICS_PATH, METRICS);

    let state = TransportState {
        endpoints: Arc::new(endpoints),
        parent,
        metrics,
        options: Arc::new(options),
        start_time: Instant::now(),
    };

    let router = Router::new()
        .route(PAYMENT_AUTH_PATH, post(authorise))
        .route(HEALTH_PATH, get(health))
        .route(METRICS_PATH, get(metrics_exposition))
        .fallback(not_found)
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic));

    HttpTransport {
        router,
        routes: Arc::new(routes),
    }
}

/// Decode an authorise request body
pub fn decode_authorise_request(body: &[u8]) -> Result<AuthorisationRequest, PaymentError> {
    serde_json::from_slice(body).map_err(|e| PaymentError::DecodeError(e.to_string()))
}

/// Encode the authorise endpoint's response envelope
pub fn encode_authorise_response(response: Envelope) -> ApiResult<Json<AuthorisationResponse>> {
    response
        .downcast::<AuthorisationResponse>()
        .map(Json)
        .map_err(|_| {
            ApiError::Internal(format!(
                "{} endpoint returned an unexpected response type",
                AUTHORISE
            ))
        })
}

async fn authorise(
    State(state): State<TransportState>,
    request: Request,
) -> ApiResult<Json<AuthorisationResponse>> {
    let (parts, body) = request.into_parts();
    let ctx = state.request_context(&parts.headers);

    let body = read_body(&ctx, body).await?;
    let request = decode_authorise_request(&body)?;
    ctx.check()?;

    debug!(amount = request.amount, "dispatching authorise");
    let response = state
        .endpoints
        .call(AUTHORISE, ctx, Envelope::new(request))?;

    encode_authorise_response(response)
}

/// Read the whole body, giving up once `ctx` is cancelled or expires
async fn read_body(ctx: &Context, body: Body) -> Result<Bytes, PaymentError> {
    let deadline = async {
        match ctx.deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        bytes = to_bytes(body, MAX_BODY_BYTES) => {
            bytes.map_err(|e| PaymentError::DecodeError(e.to_string()))
        }
        _ = ctx.cancellation_token().cancelled() => {
            Err(PaymentError::Cancelled("context cancelled".to_string()))
        }
        _ = deadline => Err(PaymentError::Cancelled("deadline exceeded".to_string())),
    }
}

async fn health(State(state): State<TransportState>) -> Json<HealthResponse> {
    let status = if state.parent.is_cancelled() {
        HealthStatus::Draining
    } else {
        HealthStatus::Healthy
    };

    Json(HealthResponse {
        status,
        service: state.options.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics_exposition(State(state): State<TransportState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");

    ApiError::Internal(format!("handler panicked: {}", detail)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label() {
        assert_eq!(route_label("/paymentAuth"), "paymentauth");
        assert_eq!(route_label("/health"), "health");
        assert_eq!(route_label("/"), "root");
        assert_eq!(route_label(""), "root");
        assert_eq!(route_label("/v1/cards/:id/authorise"), "v1_cards_id_authorise");
        assert_eq!(route_label("//a--b//"), "a_b");
    }

    #[test]
    fn test_route_matching() {
        let route = Route::new(Method::POST, "/cards/:id", "card");

        assert!(route.matches(&Method::POST, "/cards/42"));
        assert!(!route.matches(&Method::GET, "/cards/42"));
        assert!(!route.matches(&Method::POST, "/cards/"));
        assert!(!route.matches(&Method::POST, "/cards"));
        assert!(!route.matches(&Method::POST, "/cards/42/extra"));
    }

    #[test]
    fn test_route_table_first_match_wins() {
        let table = RouteTable::new()
            .with_route(Method::GET, "/items/special", "special")
            .with_route(Method::GET, "/items/:id", "item");

        assert_eq!(
            table.match_route(&Method::GET, "/items/special").map(Route::operation),
            Some("special")
        );
        assert_eq!(
            table.match_route(&Method::GET, "/items/7").map(Route::operation),
            Some("item")
        );
        assert!(table.match_route(&Method::DELETE, "/items/7").is_none());
    }

    #[test]
    fn test_route_matcher_names() {
        let table = RouteTable::new().with_route(Method::POST, PAYMENT_AUTH_PATH, AUTHORISE);

        assert_eq!(
            table.route_name(&Method::POST, "/paymentAuth"),
            Some("paymentauth".to_string())
        );
        assert_eq!(table.route_name(&Method::POST, "/paymentAuth?x=1"), None);
        assert_eq!(table.route_name(&Method::GET, "/paymentAuth"), None);
        assert_eq!(table.route_name(&Method::POST, "/unknown"), None);
    }

    #[test]
    fn test_decode_authorise_request() {
        let req = decode_authorise_request(br#"{"amount": 50.0, "card": "x"}"#).unwrap();
        assert_eq!(req.amount, 50.0);
        assert!(req.metadata.contains_key("card"));

        let req = decode_authorise_request(br#"{"amount": -5}"#).unwrap();
        assert_eq!(req.amount, -5.0);

        for body in [&b"{invalid json}"[..], b"", b"[]", br#"{"amount": "50"}"#, b"{}"] {
            assert!(matches!(
                decode_authorise_request(body),
                Err(PaymentError::DecodeError(_))
            ));
        }
    }

    fn never_ending() -> Body {
        Body::from_stream(futures_util::stream::pending::<Result<Bytes, std::io::Error>>())
    }

    #[tokio::test]
    async fn test_read_body() {
        let bytes = read_body(&Context::background(), Body::from("{}")).await.unwrap();
        assert_eq!(&bytes[..], b"{}");

        let cancelled = Context::background();
        cancelled.cancel();
        assert_eq!(
            read_body(&cancelled, never_ending()).await,
            Err(PaymentError::Cancelled("context cancelled".to_string()))
        );

        let expired = Context::background().with_timeout(Duration::ZERO);
        assert_eq!(
            read_body(&expired, never_ending()).await,
            Err(PaymentError::Cancelled("deadline exceeded".to_string()))
        );

        let oversized = Body::from(vec![b'x'; MAX_BODY_BYTES + 1]);
        assert!(matches!(
            read_body(&Context::background(), oversized).await,
            Err(PaymentError::DecodeError(_))
        ));
    }

    #[test]
    fn test_encode_rejects_foreign_envelope() {
        let err = encode_authorise_response(Envelope::new(42u8)).unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));

        let ok = encode_authorise_response(Envelope::new(AuthorisationResponse::approved()));
        assert!(ok.is_ok());
    }
}
