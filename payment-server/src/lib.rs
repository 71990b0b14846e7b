//! Payment HTTP Server - payment authorisation over HTTP
//!
//! Exposes the payment core's authorise operation at `POST /paymentAuth`,
//! with a health probe and Prometheus metrics alongside.
//!
//! `POST /paymentAuth` answers:
//!
//! - `200` with `{decision, authorised, reason?}` for an approved or
//!   declined payment;
//! - `400` with `{error, message}` for a malformed body or an invalid amount;
//! - `503` with `{error: "cancelled"}` when the request outlives its
//!   deadline (`--request-timeout-ms`) or arrives while the server is
//!   shutting down;
//! - `500` for internal failures.

pub mod api;
pub mod config;
pub mod error;
pub mod instrumentation;
pub mod telemetry;
pub mod transport;
pub mod wiring;

pub use api::{HealthResponse, HealthStatus};
pub use config::ServerConfig;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use instrumentation::{HttpMetrics, Instrument};
pub use transport::{make_http_handler, HttpTransport, RouteMatcher, RouteTable, TransportOptions};
pub use wiring::{wire_up, WireConfig};
