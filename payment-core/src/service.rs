//! The payment authorisation capability and its base implementation

use crate::context::Context;
use crate::error::{PaymentError, Result};
use crate::types::{AuthorisationRequest, AuthorisationResponse, DeclineThreshold};
use std::sync::Arc;

/// Anything that can decide whether a payment is authorised.
///
/// Implementations must be safe to call concurrently without extra locking.
pub trait Service: Send + Sync {
    /// Decide on a single request
    fn authorise(&self, ctx: &Context, request: &AuthorisationRequest)
        -> Result<AuthorisationResponse>;
}

impl<S: Service + ?Sized> Service for Arc<S> {
    fn authorise(
        &self,
        ctx: &Context,
        request: &AuthorisationRequest,
    ) -> Result<AuthorisationResponse> {
        (**self).authorise(ctx, request)
    }
}

impl<S: Service + ?Sized> Service for Box<S> {
    fn authorise(
        &self,
        ctx: &Context,
        request: &AuthorisationRequest,
    ) -> Result<AuthorisationResponse> {
        (**self).authorise(ctx, request)
    }
}

/// Threshold-based decision service
#[derive(Debug, Clone, Copy)]
pub struct AuthorisationService {
    threshold: DeclineThreshold,
}

impl AuthorisationService {
    /// Create a service that declines amounts at or above `threshold`
    pub fn new(threshold: DeclineThreshold) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> DeclineThreshold {
        self.threshold
    }
}

impl Service for AuthorisationService {
    fn authorise(
        &self,
        _ctx: &Context,
        request: &AuthorisationRequest,
    ) -> Result<AuthorisationResponse> {
        let amount = request.amount;
        if !amount.is_finite() || amount < 0.0 {
            return Err(PaymentError::InvalidRequest(format!(
                "amount must be a finite, non-negative number, got {}",
                amount
            )));
        }

        let threshold = self.threshold.value();
        if amount >= threshold {
            Ok(AuthorisationResponse::declined(format!(
                "amount {:.2} meets or exceeds decline threshold {:.2}",
                amount, threshold
            )))
        } else {
            Ok(AuthorisationResponse::approved())
        }
    }
}
