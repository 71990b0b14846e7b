//! Command-line and environment configuration

use crate::wiring::WireConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Payment authorisation server
#[derive(Debug, Clone, Parser)]
#[command(name = "payment-server", version, about)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind_address: SocketAddr,

    /// Payments of this amount or more are declined
    #[arg(long, env = "DECLINE_AMOUNT", default_value_t = 105.0)]
    pub decline_amount: f64,

    /// Name reported in logs, traces and the health probe
    #[arg(long, env = "SERVICE_NAME", default_value = "payment")]
    pub service_name: String,

    /// Per-request deadline in milliseconds (0 disables it)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    /// Export traces over OTLP
    #[arg(long, env = "OTEL_ENABLED")]
    pub otel_enabled: bool,

    /// Emit logs as JSON
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// Settings consumed by the wiring layer
    pub fn wire_config(&self) -> WireConfig {
        WireConfig {
            decline_amount: self.decline_amount,
            service_name: self.service_name.clone(),
            request_timeout: self.request_timeout(),
        }
    }
}
