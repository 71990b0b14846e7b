//! Per-call context threaded through every layer
//!
//! Carries cancellation, an optional deadline and the distributed-tracing
//! context extracted by the transport. Cloning is cheap; every clone shares
//! the same cancellation state.

use crate::error::{PaymentError, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Call context
#[derive(Debug, Clone)]
pub struct Context {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    trace: opentelemetry::Context,
}

impl Context {
    /// Context tied to the given cancellation token
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            deadline: None,
            trace: opentelemetry::Context::new(),
        }
    }

    /// Context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Set an absolute deadline; an earlier existing deadline wins
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Set a deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach the remote parent extracted from the transport
    pub fn with_trace_context(mut self, trace: opentelemetry::Context) -> Self {
        self.trace = trace;
        self
    }

    /// Derive a context whose cancellation follows this one but can also be
    /// cancelled on its own
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
            trace: self.trace.clone(),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn trace_context(&self) -> &opentelemetry::Context {
        &self.trace
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    /// Fail with [`PaymentError::Cancelled`] if no more work should be done
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PaymentError::Cancelled("context cancelled".to_string()));
        }
        if self.is_expired() {
            return Err(PaymentError::Cancelled("deadline exceeded".to_string()));
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
