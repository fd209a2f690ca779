//! Environment-driven service configuration.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Default bind address when `HOOK_BIND_ADDR` is not set.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
/// Default provider API base when `HOOK_PROVIDER_API` is not set.
const DEFAULT_PROVIDER_API: &str = "https://api.github.com";
/// Default timeout applied to every outbound HTTP call.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub bind_addr: SocketAddr,
    /// Static secret for provider webhook signatures.
    pub webhook_secret: String,
    /// Endpoint of the test-execution worker.
    pub worker_endpoint: String,
    /// Base URL of the provider API.
    pub provider_api: String,
    /// Token for authenticated provider calls, if any.
    pub provider_token: Option<String>,
    /// Public base URL of this service, used to build callback URLs and
    /// report permalinks.
    pub public_base: String,
    /// Timeout for outbound HTTP calls (dispatch, cancel, notify).
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = optional("HOOK_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into());
        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar {
                name: "HOOK_BIND_ADDR",
                value: bind_addr_raw,
            })?;
        let http_timeout = match optional("HOOK_HTTP_TIMEOUT_SECS") {
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                ConfigError::InvalidVar {
                    name: "HOOK_HTTP_TIMEOUT_SECS",
                    value: raw,
                }
            })?),
        };
        Ok(Config {
            bind_addr,
            webhook_secret: required("HOOK_WEBHOOK_SECRET")?,
            worker_endpoint: required("HOOK_WORKER_ENDPOINT")?,
            provider_api: optional("HOOK_PROVIDER_API")
                .unwrap_or_else(|| DEFAULT_PROVIDER_API.into()),
            provider_token: optional("HOOK_PROVIDER_TOKEN"),
            public_base: required("HOOK_PUBLIC_BASE")?,
            http_timeout,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::MissingVar(name))
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
