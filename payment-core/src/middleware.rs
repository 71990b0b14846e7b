//! Service decorators
//!
//! A decorator implements [`Service`], holds exactly one inner service and
//! adds a single concern around the delegated call. Decorators are built
//! through [`tower::Layer`] so they stack with [`tower::ServiceBuilder`]:
//!
//! ```
//! use payment_core::{AuthorisationService, DeclineThreshold, LoggingLayer};
//! use tower::ServiceBuilder;
//!
//! let logger = tracing::info_span!("payment");
//! let service = ServiceBuilder::new()
//!     .layer(LoggingLayer::new(logger))
//!     .service(AuthorisationService::new(DeclineThreshold::new(100.0).unwrap()));
//! # let _ = service;
//! ```
//!
//! Layers added first end up outermost.

use crate::context::Context;
use crate::error::{PaymentError, Result};
use crate::service::Service;
use crate::types::{AuthorisationRequest, AuthorisationResponse};
use std::time::Instant;
use tracing::{error, info, warn, Span};

/// Logs every `authorise` call without touching its outcome
#[derive(Debug, Clone)]
pub struct LoggingMiddleware<S> {
    next: S,
    logger: Span,
}

impl<S> LoggingMiddleware<S> {
    /// Wrap `next`; events are emitted as children of `logger`
    pub fn new(next: S, logger: Span) -> Self {
        Self { next, logger }
    }

    pub fn get_ref(&self) -> &S {
        &self.next
    }
}

impl<S: Service> Service for LoggingMiddleware<S> {
    fn authorise(
        &self,
        ctx: &Context,
        request: &AuthorisationRequest,
    ) -> Result<AuthorisationResponse> {
        let start = Instant::now();
        let result = self.next.authorise(ctx, request);
        let took = start.elapsed();

        match &result {
            Ok(response) => info!(
                parent: &self.logger,
                method = "authorise",
                amount = request.amount,
                decision = %response.decision,
                took = ?took,
                "authorise completed"
            ),
            Err(err @ PaymentError::Internal(_)) | Err(err @ PaymentError::Config(_)) => error!(
                parent: &self.logger,
                method = "authorise",
                amount = request.amount,
                kind = err.kind(),
                err = %err,
                took = ?took,
                "authorise failed"
            ),
            Err(err) => warn!(
                parent: &self.logger,
                method = "authorise",
                amount = request.amount,
                kind = err.kind(),
                err = %err,
                took = ?took,
                "authorise failed"
            ),
        }

        result
    }
}

/// Layer producing [`LoggingMiddleware`]
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    logger: Span,
}

impl LoggingLayer {
    pub fn new(logger: Span) -> Self {
        Self { logger }
    }
}

impl<S> tower::Layer<S> for LoggingLayer {
    type Service = LoggingMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingMiddleware::new(inner, self.logger.clone())
    }
}
