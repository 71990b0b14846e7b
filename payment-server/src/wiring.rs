//! Assembles the payment stack: service, logging, endpoints, transport and
//! instrumentation

use crate::instrumentation::{HttpMetrics, Instrument};
use crate::transport::{make_http_handler, TransportOptions};
use axum::Router;
use payment_core::{make_endpoints, AuthorisationService, DeclineThreshold, LoggingLayer, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Span;

/// Settings needed to assemble the stack
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Decline threshold
    pub decline_amount: f64,
    pub service_name: String,
    pub request_timeout: Option<Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            decline_amount: 105.0,
            service_name: "payment".to_string(),
            request_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Build the instrumented HTTP handler and the root logging span.
///
/// Cancelling `parent` cancels every in-flight request context. Fails with
/// a configuration error when the decline amount is not a valid threshold.
pub fn wire_up(
    parent: CancellationToken,
    config: &WireConfig,
    metrics: Arc<HttpMetrics>,
) -> Result<(Router, Span)> {
    let logger = tracing::info_span!("payment", service = %config.service_name);

    let threshold = DeclineThreshold::new(config.decline_amount)?;
    let service = ServiceBuilder::new()
        .layer(LoggingLayer::new(logger.clone()))
        .service(AuthorisationService::new(threshold));

    let endpoints = make_endpoints(service);

    let transport = make_http_handler(
        parent,
        endpoints,
        metrics.clone(),
        TransportOptions {
            service_name: config.service_name.clone(),
            request_timeout: config.request_timeout,
        },
    );

    let handler = Instrument::new(metrics, transport.routes())
        .wrap(transport.into_router())
        .layer(TraceLayer::new_for_http());

    Ok((handler, logger))
}
