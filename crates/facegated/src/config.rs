use facegate_core::settings::{Settings, SettingsError};
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Daemon configuration: the shared core settings plus the HTTP surface.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    /// Listen address (default: 127.0.0.1:8001).
    pub bind: SocketAddr,
    /// Upper bound on one request's wait for the engine thread.
    pub request_timeout: Duration,
    /// Largest accepted request body; base64 photos run to several MB.
    pub max_body_bytes: usize,
}

impl Config {
    /// Load core settings, then the daemon's own `FACEGATE_*` variables.
    pub fn load() -> Result<Self, SettingsError> {
        Ok(Self::with_settings(Settings::load()?, |key| std::env::var(key).ok()))
    }

    fn with_settings(settings: Settings, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind = lookup("FACEGATE_BIND")
            .and_then(|v| match v.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!(value = %v, error = %e, "ignoring invalid FACEGATE_BIND");
                    None
                }
            })
            .unwrap_or_else(default_bind);

        let timeout_secs = lookup("FACEGATE_REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let max_body_bytes = lookup("FACEGATE_MAX_BODY_BYTES")
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Self {
            settings,
            bind,
            request_timeout: Duration::from_secs(timeout_secs),
            max_body_bytes,
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8001))
}
