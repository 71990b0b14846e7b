//! Payment Core - threshold-based payment authorisation
//!
//! This crate holds the transport-independent part of the payment service:
//! the decision service, its decorators, the endpoint adapters and the call
//! context threaded through all of them.

#![deny(unsafe_code)]

pub mod context;
pub mod endpoint;
pub mod error;
pub mod middleware;
pub mod service;
pub mod types;

pub use context::Context;
pub use endpoint::{make_endpoints, Endpoint, Endpoints, Envelope, AUTHORISE};
pub use error::{PaymentError, Result};
pub use middleware::{LoggingLayer, LoggingMiddleware};
pub use service::{AuthorisationService, Service};
pub use types::{AuthorisationRequest, AuthorisationResponse, Decision, DeclineThreshold};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
