//! Assistant configuration: answering-service address and request timeouts.
//!
//! DESIGN
//! ======
//! The service base address lives in a process-wide slot. A host installs an
//! override once at startup; the first read freezes whatever is there (the
//! override, or the local development default) so every later request sees
//! the same address. Per-client timeouts are plain values parsed from the
//! environment with defaults.

use std::sync::OnceLock;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const SELECTION_QUIET_PERIOD_MS: u64 = 150;

static API_BASE_URL: OnceLock<String> = OnceLock::new();

/// Errors produced while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The base address is empty or not an http(s) URL.
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),

    /// The process-wide base address was already installed or read.
    #[error("API base URL already resolved as {current}")]
    AlreadyResolved { current: String },
}

// =============================================================================
// BASE ADDRESS
// =============================================================================

/// Validate a base address and strip trailing slashes.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] when the value is blank or does not
/// use the `http`/`https` scheme.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let has_scheme = trimmed.starts_with("http://") || trimmed.starts_with("https://");
    let has_host = trimmed
        .split_once("://")
        .is_some_and(|(_, rest)| !rest.is_empty());
    if !has_scheme || !has_host {
        return Err(ConfigError::InvalidBaseUrl(raw.to_owned()));
    }
    Ok(trimmed.to_owned())
}

/// Install the process-wide base address override.
///
/// # Errors
///
/// Returns an error if the address is invalid or the slot has already been
/// resolved by an earlier install or read.
pub fn install_api_base_url(raw: &str) -> Result<(), ConfigError> {
    let url = normalize_base_url(raw)?;
    API_BASE_URL
        .set(url)
        .map_err(|_| ConfigError::AlreadyResolved { current: api_base_url().to_owned() })
}

/// Return the process-wide base address, resolving it on first use.
pub fn api_base_url() -> &'static str {
    API_BASE_URL.get_or_init(|| DEFAULT_API_BASE_URL.to_owned())
}

// =============================================================================
// CLIENT CONFIG
// =============================================================================

/// Per-client request settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Hard bound on one `/chat` call, including reading the body.
    pub request_timeout_ms: u64,
    pub connect_timeout_secs: u64,
    /// Instance override for the base address. `None` reads the process slot
    /// at call time.
    pub base_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            base_url: None,
        }
    }
}

impl ClientConfig {
    /// Build client config from environment variables.
    ///
    /// Optional:
    /// - `CHATBOT_TIMEOUT_MS`: default 30000
    /// - `CHATBOT_CONNECT_TIMEOUT_SECS`: default 10
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            request_timeout_ms: env_parse("CHATBOT_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout_secs: env_parse("CHATBOT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            base_url: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
