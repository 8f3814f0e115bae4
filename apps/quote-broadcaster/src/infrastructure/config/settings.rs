//! Service Configuration Settings
//!
//! Configuration types for the quote broadcaster, loaded from environment
//! variables. Parsing runs against an injectable key lookup; `from_env`
//! binds it to the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::quote::Symbol;

/// Symbols fetched when `QUOTE_SYMBOLS` is unset.
pub const DEFAULT_SYMBOLS: &[&str] = &[
    "AAPL", "AMZN", "GOOGL", "MSFT", "TSLA", "GOOG", "NVDA", "BA", "NFLX",
];

/// Upstream quote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// Yahoo Finance chart API (price plus intraday history).
    #[default]
    Yahoo,
    /// Google Finance quote page scrape (price only).
    Google,
}

impl ProviderKind {
    /// Parse provider from string; unknown values fall back to the default.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "google" => Self::Google,
            _ => Self::Yahoo,
        }
    }

    /// Provider name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::Google => "google",
        }
    }
}

/// What the broadcaster does when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlowConsumerPolicy {
    /// Unregister the subscriber; its connection task then closes.
    #[default]
    Disconnect,
    /// Skip this frame for the subscriber and keep it registered.
    DropFrame,
}

impl SlowConsumerPolicy {
    /// Parse policy from string; unknown values fall back to the default.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "drop" | "drop_frame" | "dropframe" => Self::DropFrame,
            _ => Self::Disconnect,
        }
    }

    /// Policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::DropFrame => "drop",
        }
    }
}

/// Fetch round settings.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Delay after each round before the next one starts.
    pub round_interval: Duration,
    /// Maximum in-flight upstream requests per round.
    pub concurrency_limit: usize,
    /// Per-symbol fetch timeout.
    pub fetch_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            round_interval: Duration::from_secs(5),
            concurrency_limit: 8,
            fetch_timeout: Duration::from_millis(5000),
        }
    }
}

/// Push delivery settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Bounded outbound queue length per subscriber.
    pub queue_capacity: usize,
    /// Behaviour when a subscriber's queue is full.
    pub slow_consumer_policy: SlowConsumerPolicy,
    /// Prime new subscribers with the last published frame.
    pub replay_last_on_connect: bool,
    /// Include intraday history in push payloads.
    pub include_history: bool,
    /// WebSocket ping / SSE comment period.
    pub keepalive_interval: Duration,
    /// Bound on a single socket send.
    pub send_timeout: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            slow_consumer_policy: SlowConsumerPolicy::Disconnect,
            replay_last_on_connect: true,
            include_history: false,
            keepalive_interval: Duration::from_secs(15),
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP listener port.
    pub http_port: u16,
    /// Directory holding `index.html` and static assets.
    pub static_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8000,
            static_dir: PathBuf::from("./static"),
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Selected provider.
    pub kind: ProviderKind,
    /// Yahoo chart API base URL.
    pub yahoo_base_url: String,
    /// Yahoo intraday bar interval (e.g. `5m`).
    pub yahoo_interval: String,
    /// Google Finance base URL.
    pub google_base_url: String,
    /// Exchange suffix for Google Finance pages.
    pub google_exchange: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Yahoo,
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            yahoo_interval: "5m".to_string(),
            google_base_url: "https://www.google.com".to_string(),
            google_exchange: "NASDAQ".to_string(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Symbols fetched each round (deduplicated, order kept).
    pub symbols: Vec<Symbol>,
    /// Fetch round settings.
    pub fetch: FetchSettings,
    /// Push delivery settings.
    pub broadcast: BroadcastSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Upstream provider settings.
    pub provider: ProviderSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().copied().map(Symbol::from).collect(),
            fetch: FetchSettings::default(),
            broadcast: BroadcastSettings::default(),
            server: ServerSettings::default(),
            provider: ProviderSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but structurally invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyValue` if the symbol list is empty and
    /// `ConfigError::InvalidValue` for zero intervals, limits or capacities.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let symbols = match lookup("QUOTE_SYMBOLS") {
            Some(raw) => {
                let symbols = parse_symbols(&raw);
                if symbols.is_empty() {
                    return Err(ConfigError::EmptyValue("QUOTE_SYMBOLS".to_string()));
                }
                symbols
            }
            None => Self::default().symbols,
        };

        let fetch_defaults = FetchSettings::default();
        let fetch = FetchSettings {
            round_interval: parse_duration_secs(
                &lookup,
                "QUOTE_ROUND_INTERVAL_SECS",
                fetch_defaults.round_interval,
            ),
            concurrency_limit: parse_usize(
                &lookup,
                "QUOTE_FETCH_CONCURRENCY",
                fetch_defaults.concurrency_limit,
            ),
            fetch_timeout: parse_duration_millis(
                &lookup,
                "QUOTE_FETCH_TIMEOUT_MS",
                fetch_defaults.fetch_timeout,
            ),
        };
        require_nonzero("QUOTE_ROUND_INTERVAL_SECS", fetch.round_interval.as_secs())?;
        require_nonzero("QUOTE_FETCH_CONCURRENCY", fetch.concurrency_limit)?;
        require_nonzero("QUOTE_FETCH_TIMEOUT_MS", fetch.fetch_timeout.as_millis())?;

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            queue_capacity: parse_usize(
                &lookup,
                "QUOTE_SUBSCRIBER_QUEUE_CAPACITY",
                broadcast_defaults.queue_capacity,
            ),
            slow_consumer_policy: lookup("QUOTE_SLOW_CONSUMER_POLICY")
                .map(|s| SlowConsumerPolicy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            replay_last_on_connect: parse_bool(
                &lookup,
                "QUOTE_REPLAY_LAST_ON_CONNECT",
                broadcast_defaults.replay_last_on_connect,
            ),
            include_history: parse_bool(
                &lookup,
                "QUOTE_PUSH_INCLUDE_HISTORY",
                broadcast_defaults.include_history,
            ),
            keepalive_interval: parse_duration_secs(
                &lookup,
                "QUOTE_KEEPALIVE_INTERVAL_SECS",
                broadcast_defaults.keepalive_interval,
            ),
            send_timeout: parse_duration_secs(
                &lookup,
                "QUOTE_SEND_TIMEOUT_SECS",
                broadcast_defaults.send_timeout,
            ),
        };
        require_nonzero("QUOTE_SUBSCRIBER_QUEUE_CAPACITY", broadcast.queue_capacity)?;
        require_nonzero(
            "QUOTE_KEEPALIVE_INTERVAL_SECS",
            broadcast.keepalive_interval.as_secs(),
        )?;

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            http_port: parse_u16(&lookup, "QUOTE_HTTP_PORT", server_defaults.http_port),
            static_dir: lookup("QUOTE_STATIC_DIR")
                .filter(|v| !v.trim().is_empty())
                .map_or(server_defaults.static_dir, PathBuf::from),
        };

        let provider_defaults = ProviderSettings::default();
        let provider = ProviderSettings {
            kind: lookup("QUOTE_PROVIDER")
                .map(|s| ProviderKind::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            yahoo_base_url: parse_string(
                &lookup,
                "QUOTE_YAHOO_BASE_URL",
                provider_defaults.yahoo_base_url,
            ),
            yahoo_interval: parse_string(
                &lookup,
                "QUOTE_YAHOO_INTERVAL",
                provider_defaults.yahoo_interval,
            ),
            google_base_url: parse_string(
                &lookup,
                "QUOTE_GOOGLE_BASE_URL",
                provider_defaults.google_base_url,
            ),
            google_exchange: parse_string(
                &lookup,
                "QUOTE_GOOGLE_EXCHANGE",
                provider_defaults.google_exchange,
            ),
        };

        Ok(Self {
            symbols,
            fetch,
            broadcast,
            server,
            provider,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a structurally invalid value.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Split a comma/whitespace separated symbol list, dropping duplicates.
fn parse_symbols(raw: &str) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() || symbols.iter().any(|s| s.as_str() == token) {
            continue;
        }
        symbols.push(Symbol::new(token));
    }
    symbols
}

fn require_nonzero<T>(key: &str, value: T) -> Result<(), ConfigError>
where
    T: Default + PartialEq + std::fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_string<F>(lookup: &F, key: &str, default: String) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parse_u16<F>(lookup: &F, key: &str, default: u16) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
