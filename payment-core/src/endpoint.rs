//! Transport-neutral endpoints
//!
//! An endpoint adapts one service operation to a type-erased
//! request/response pair so transports only deal with [`Envelope`]s and
//! operation names. Each call runs inside a tracing span named after the
//! operation, parented on the remote trace context carried by [`Context`].

use crate::context::Context;
use crate::error::{PaymentError, Result};
use crate::service::Service;
use crate::types::{AuthorisationRequest, AuthorisationResponse};
use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::field::Empty;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Operation name of the authorise endpoint
pub const AUTHORISE: &str = "authorise";

/// Type-erased request or response value
pub struct Envelope(Box<dyn Any + Send>);

impl Envelope {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Take the concrete value out, or get the envelope back on mismatch
    pub fn downcast<T: Any>(self) -> std::result::Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(inner) => Err(Self(inner)),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope").finish_non_exhaustive()
    }
}

/// A single operation bound to a service
pub type Endpoint = Arc<dyn Fn(Context, Envelope) -> Result<Envelope> + Send + Sync>;

/// All endpoints exposed by the service, keyed by operation name
#[derive(Clone)]
pub struct Endpoints {
    endpoints: BTreeMap<&'static str, Endpoint>,
}

impl Endpoints {
    pub fn get(&self, operation: &str) -> Option<&Endpoint> {
        self.endpoints.get(operation)
    }

    /// Names of every registered operation
    pub fn operations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.endpoints.keys().copied()
    }

    /// Invoke an endpoint by name
    pub fn call(&self, operation: &str, ctx: Context, request: Envelope) -> Result<Envelope> {
        let endpoint = self
            .get(operation)
            .ok_or_else(|| PaymentError::Internal(format!("no endpoint for {}", operation)))?;
        endpoint(ctx, request)
    }

    /// Typed shortcut for the authorise endpoint
    pub fn authorise(
        &self,
        ctx: Context,
        request: AuthorisationRequest,
    ) -> Result<AuthorisationResponse> {
        self.call(AUTHORISE, ctx, Envelope::new(request))?
            .downcast::<AuthorisationResponse>()
            .map_err(|_| {
                PaymentError::Internal(format!(
                    "{} endpoint returned an unexpected response type",
                    AUTHORISE
                ))
            })
    }
}

impl fmt::Debug for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.endpoints.keys()).finish()
    }
}

/// Build the endpoint set for a service
pub fn make_endpoints<S>(service: S) -> Endpoints
where
    S: Service + 'static,
{
    let service: Arc<dyn Service> = Arc::new(service);

    let mut endpoints: BTreeMap<&'static str, Endpoint> = BTreeMap::new();
    endpoints.insert(AUTHORISE, make_authorise_endpoint(service));

    Endpoints { endpoints }
}

/// Endpoint for [`Service::authorise`]
pub fn make_authorise_endpoint(service: Arc<dyn Service>) -> Endpoint {
    Arc::new(move |ctx: Context, request: Envelope| -> Result<Envelope> {
        let request = request.downcast::<AuthorisationRequest>().map_err(|_| {
            PaymentError::DecodeError(format!(
                "bad request: expected {}",
                type_name::<AuthorisationRequest>()
            ))
        })?;

        let span = tracing::info_span!(
            "authorise",
            otel.name = AUTHORISE,
            otel.kind = "server",
            otel.status_code = Empty,
            error = Empty,
        );
        span.set_parent(ctx.trace_context().clone());
        let _guard = span.enter();

        let result = catch_unwind(AssertUnwindSafe(|| service.authorise(&ctx, &request)))
            .unwrap_or_else(|panic| Err(PaymentError::Internal(panic_message(panic.as_ref()))));

        match &result {
            Ok(_) => {
                span.record("otel.status_code", "OK");
            }
            Err(err) => {
                span.record("otel.status_code", "ERROR");
                span.record("error", tracing::field::display(err));
            }
        }

        result.map(Envelope::new)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    format!("service panicked: {}", detail)
}
