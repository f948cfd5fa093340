//! Configuration management for the gateway.
//!
//! Everything is read from environment variables (optionally seeded from a
//! `.env` file). Token acquisition happens outside this process; the gateway
//! only needs the resulting upstream credential.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Upstream base URLs keyed by account type.
const ACCOUNT_TYPE_URLS: &[(&str, &str)] = &[
    ("individual", "https://api.githubcopilot.com"),
    ("business", "https://api.business.githubcopilot.com"),
    ("enterprise", "https://api.enterprise.githubcopilot.com"),
];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port)
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream chat-completions endpoint and credential
    pub upstream: UpstreamConfig,

    /// Adaptive rate limiter tuning
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Client API key; when unset the gateway is open
    #[serde(default)]
    pub api_key: Option<String>,

    /// Whether to verify SSL certificates for upstream requests
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Request timeout in seconds for upstream calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Bearer credential sent on every upstream request
    pub token: String,

    /// individual | business | enterprise
    #[serde(default = "default_account_type")]
    pub account_type: String,

    /// Explicit base URL, overriding the account-type table
    #[serde(default)]
    pub base_url: Option<String>,

    /// Editor version reported in `editor-version`
    #[serde(default = "default_vscode_version")]
    pub vscode_version: String,
}

impl UpstreamConfig {
    /// Resolve the base URL for chat completions.
    pub fn resolve_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        match ACCOUNT_TYPE_URLS
            .iter()
            .find(|(account_type, _)| *account_type == self.account_type)
        {
            Some((_, url)) => Ok(url.to_string()),
            None => {
                let allowed: Vec<&str> = ACCOUNT_TYPE_URLS.iter().map(|(t, _)| *t).collect();
                bail!(
                    "Invalid account type \"{}\". Must be one of: {}",
                    self.account_type,
                    allowed.join(", ")
                )
            }
        }
    }
}

/// Adaptive rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum spacing between admissions once the burst is spent
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Admissions allowed back-to-back with no prior history
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Callers allowed to wait at once before new ones are shed
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            burst: default_burst(),
            max_queued: default_max_queued(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4141
}

fn default_account_type() -> String {
    "individual".to_string()
}

fn default_vscode_version() -> String {
    "1.99.3".to_string()
}

fn default_verify_ssl() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    300
}

fn default_interval_ms() -> u64 {
    250
}

fn default_burst() -> u32 {
    8
}

fn default_max_queued() -> usize {
    100
}

impl AppConfig {
    /// Build configuration from environment variables.
    ///
    /// `COPILOT_TOKEN` is required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let token = match std::env::var("COPILOT_TOKEN") {
            Ok(token) if !token.trim().is_empty() => token,
            _ => bail!("COPILOT_TOKEN environment variable is required"),
        };

        let mut config = AppConfig {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                token,
                account_type: default_account_type(),
                base_url: None,
                vscode_version: default_vscode_version(),
            },
            rate_limit: RateLimitConfig::default(),
            api_key: None,
            verify_ssl: default_verify_ssl(),
            request_timeout_secs: default_request_timeout(),
        };

        if let Ok(host) = std::env::var("HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            config.server.port = port;
        }

        if let Ok(account_type) = std::env::var("ACCOUNT_TYPE") {
            config.upstream.account_type = account_type.trim().to_lowercase();
        }
        config.upstream.base_url = env_non_empty("UPSTREAM_BASE_URL");
        if let Some(version) = env_non_empty("VSCODE_VERSION") {
            config.upstream.vscode_version = version;
        }

        config.api_key = env_non_empty("API_KEY");

        if let Ok(verify_ssl_str) = std::env::var("VERIFY_SSL") {
            config.verify_ssl = str_to_bool(&verify_ssl_str);
        }
        if let Some(timeout) = env_parse::<u64>("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = timeout;
        }

        config.rate_limit = RateLimitConfig {
            interval_ms: env_positive("RATE_LIMIT_INTERVAL_MS", default_interval_ms()),
            burst: env_positive("RATE_LIMIT_BURST", default_burst()),
            max_queued: env_positive("RATE_LIMIT_MAX_QUEUE", default_max_queued()),
        };

        // Fail at startup rather than on the first request
        config.upstream.resolve_base_url()?;

        Ok(config)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse a positive number, falling back to `default` for zero or garbage.
fn env_positive<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    env_parse::<T>(key)
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive) as true.
/// Everything else is false.
pub fn str_to_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
