//! Channel Configuration Settings
//!
//! Configuration for the live channel, its liveness probe and the poll loop,
//! loaded from `CONSOLE_*` environment variables.

use std::time::Duration;

use url::Url;

use crate::domain::connection::ReconnectConfig;

/// Default REST API base.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// Backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Base URL every API path is appended to.
    pub api_base: Url,
    /// Liveness endpoint, outside the API base.
    pub health_url: Url,
    /// WebSocket endpoint for live updates.
    pub ws_url: Url,
}

impl Endpoints {
    /// Derive the health and WebSocket endpoints from the API origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the API base is not an `http` or `https` URL.
    pub fn from_api_base(api_base: Url) -> Result<Self, ConfigError> {
        let origin = origin_of(&api_base, "CONSOLE_API_BASE")?;
        let health_url = join(&origin, "/healthz", "CONSOLE_HEALTH_URL")?;
        let ws_url = join(&http_to_ws(&origin)?, "/ws", "CONSOLE_WS_URL")?;

        Ok(Self {
            api_base,
            health_url,
            ws_url,
        })
    }
}

impl Default for Endpoints {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self {
            api_base: Url::parse(DEFAULT_API_BASE).expect("static API base is valid"),
            health_url: Url::parse("http://localhost:8000/healthz")
                .expect("static health URL is valid"),
            ws_url: Url::parse("ws://localhost:8000/ws").expect("static WebSocket URL is valid"),
        }
    }
}

/// Reconnection settings for the live channel.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Maximum automatic reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(1000),
            delay_max: Duration::from_millis(30_000),
            delay_multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectSettings {
    /// Convert to the policy configuration.
    #[must_use]
    pub const fn to_policy(&self) -> ReconnectConfig {
        ReconnectConfig::new(
            self.delay_initial,
            self.delay_max,
            self.delay_multiplier,
            0.0,
            self.max_attempts,
        )
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between the end of one run and the start of the next.
    pub interval: Duration,
    /// API path polled by the watcher.
    pub path: String,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10_000),
            path: "/devices".to_string(),
        }
    }
}

/// Complete channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Backend endpoints.
    pub endpoints: Endpoints,
    /// Whether to probe the health endpoint before opening the socket.
    pub probe_enabled: bool,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Poll loop settings.
    pub poll: PollSettings,
    /// HTTP request timeout.
    pub http_timeout: Duration,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            probe_enabled: true,
            reconnect: ReconnectSettings::default(),
            poll: PollSettings::default(),
            http_timeout: Duration::from_secs(15),
            metrics_port: 0,
        }
    }
}

impl ChannelConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured URL is malformed or has the wrong
    /// scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured URL is malformed or has the wrong
    /// scheme.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base = match non_empty(&lookup, "CONSOLE_API_BASE") {
            Some(raw) => parse_url("CONSOLE_API_BASE", &raw)?,
            None => defaults.endpoints.api_base.clone(),
        };
        let mut endpoints = Endpoints::from_api_base(api_base)?;

        if let Some(raw) = non_empty(&lookup, "CONSOLE_HEALTH_URL") {
            endpoints.health_url = parse_url("CONSOLE_HEALTH_URL", &raw)?;
        }
        if let Some(raw) = non_empty(&lookup, "CONSOLE_WS_URL") {
            let ws_url = parse_url("CONSOLE_WS_URL", &raw)?;
            if !matches!(ws_url.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidUrl {
                    key: "CONSOLE_WS_URL".to_string(),
                    message: format!("expected ws or wss scheme, got {}", ws_url.scheme()),
                });
            }
            endpoints.ws_url = ws_url;
        }

        let probe_enabled = parse_bool(&lookup, "CONSOLE_PROBE_ENABLED", defaults.probe_enabled);

        let reconnect = ReconnectSettings {
            delay_initial: parse_duration_millis(
                &lookup,
                "CONSOLE_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect.delay_initial,
            ),
            delay_max: parse_duration_millis(
                &lookup,
                "CONSOLE_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect.delay_max,
            ),
            delay_multiplier: parse_or(
                &lookup,
                "CONSOLE_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect.delay_multiplier,
            ),
            max_attempts: parse_or(
                &lookup,
                "CONSOLE_MAX_RECONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
        };

        let poll = PollSettings {
            interval: parse_duration_millis(
                &lookup,
                "CONSOLE_POLL_INTERVAL_MS",
                defaults.poll.interval,
            ),
            path: non_empty(&lookup, "CONSOLE_POLL_PATH").unwrap_or(defaults.poll.path),
        };

        let http_timeout = parse_or(&lookup, "CONSOLE_HTTP_TIMEOUT_SECS", 0_u64);
        let http_timeout = if http_timeout == 0 {
            defaults.http_timeout
        } else {
            Duration::from_secs(http_timeout)
        };

        Ok(Self {
            endpoints,
            probe_enabled,
            reconnect,
            poll,
            http_timeout,
            metrics_port: parse_or(&lookup, "CONSOLE_METRICS_PORT", defaults.metrics_port),
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A URL setting could not be used.
    #[error("invalid URL in {key}: {message}")]
    InvalidUrl {
        /// Setting name.
        key: String,
        /// What was wrong with it.
        message: String,
    },
}

/// Convert an `http`/`https` URL to the matching `ws`/`wss` URL.
///
/// # Errors
///
/// Returns an error for any other scheme.
pub fn http_to_ws(url: &Url) -> Result<Url, ConfigError> {
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(scheme_error("http or https", other)),
    };
    with_scheme(url, scheme)
}

/// Convert a `ws`/`wss` URL to the matching `http`/`https` URL.
///
/// # Errors
///
/// Returns an error for any other scheme.
pub fn ws_to_http(url: &Url) -> Result<Url, ConfigError> {
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => return Err(scheme_error("ws or wss", other)),
    };
    with_scheme(url, scheme)
}

fn with_scheme(url: &Url, scheme: &str) -> Result<Url, ConfigError> {
    let mut converted = url.clone();
    converted
        .set_scheme(scheme)
        .map_err(|()| scheme_error(scheme, url.scheme()))?;
    Ok(converted)
}

fn scheme_error(expected: &str, got: &str) -> ConfigError {
    ConfigError::InvalidUrl {
        key: "scheme".to_string(),
        message: format!("expected {expected}, got {got}"),
    }
}

fn origin_of(url: &Url, key: &str) -> Result<Url, ConfigError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            message: format!("expected http or https scheme, got {}", url.scheme()),
        });
    }
    join(url, "/", key)
}

fn join(base: &Url, path: &str, key: &str) -> Result<Url, ConfigError> {
    base.join(path).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|v| v.trim().to_lowercase()).as_deref() {
        Some("true" | "1" | "yes") => true,
        Some("false" | "0" | "no") => false,
        _ => default,
    }
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
