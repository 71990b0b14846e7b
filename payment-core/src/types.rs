//! Request and response values for payment authorisation

use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Authorisation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorisationRequest {
    /// Transaction amount
    pub amount: f64,

    /// Any other members of the request body, carried through untouched
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AuthorisationRequest {
    /// Create a request without metadata
    pub fn new(amount: f64) -> Self {
        Self {
            amount,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach an opaque metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Authorisation decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Amount is below the decline threshold
    Approved,
    /// Amount meets or exceeds the decline threshold
    Declined,
}

impl Decision {
    /// Check if the payment may proceed
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Declined => "declined",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorisation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorisationResponse {
    /// The decision
    pub decision: Decision,

    /// `true` when approved
    pub authorised: bool,

    /// Why the payment was declined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuthorisationResponse {
    pub fn approved() -> Self {
        Self {
            decision: Decision::Approved,
            authorised: true,
            reason: None,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Declined,
            authorised: false,
            reason: Some(reason.into()),
        }
    }
}

/// Amount at or above which payments are declined
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct DeclineThreshold(f64);

impl DeclineThreshold {
    /// Validate and wrap a threshold; it must be finite and non-negative
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(PaymentError::Config(format!(
                "decline threshold must be a finite, non-negative number, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for DeclineThreshold {
    type Error = PaymentError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}
