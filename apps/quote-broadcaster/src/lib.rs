#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::items_after_statements
    )
)]

//! Quote Broadcaster - Stock Snapshot Fan-out
//!
//! Periodically fetches a fixed set of stock quotes from an upstream
//! provider and republishes changed snapshots to browser clients over
//! WebSocket and Server-Sent Events. A polling endpoint computes a fresh
//! snapshot on demand.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Quote and snapshot types
//!   - `quote`: Symbols, quotes, per-symbol fetch outcomes
//!   - `snapshot`: Aggregation and change detection
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `QuoteProvider` (fetch one symbol)
//!   - `services`: `QuoteFetcher`, `PollingScheduler`
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `providers`: Yahoo chart API, Google Finance scrape
//!   - `broadcast`: Connection registry and fan-out
//!   - `http`: Poll, WebSocket, SSE, static assets, health
//!   - `config`, `telemetry`, `metrics`: ambient setup
//!
//! # Data Flow
//!
//! ```text
//! PollingScheduler ──► QuoteFetcher ──► Snapshot::aggregate ──► ChangeDetector
//!                        │ (≤ N in flight)                          │ changed
//!                        ▼                                          ▼
//!                  QuoteProvider                              Broadcaster ──► /ws, /events
//!
//! GET /data ──► QuoteFetcher ──► Snapshot::aggregate ──► JSON
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote and snapshot types.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::quote::{FailureReason, FetchResult, Quote, Symbol};
pub use domain::snapshot::{ChangeDetector, LastPublished, Snapshot, should_publish};

// Application
pub use application::ports::{ProviderError, QuoteProvider};
pub use application::services::{
    PollingScheduler, QuoteFetcher, RoundError, RoundReport, SchedulerState, SchedulerStatus,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, FetchSettings, ProviderKind, ProviderSettings,
    ServerSettings, ServiceConfig, SlowConsumerPolicy,
};

// Broadcaster
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastError, BroadcastStats, Broadcaster, PublishReport,
    SharedBroadcaster, SnapshotFrame, Subscription, SubscriptionId,
};

// HTTP surface
pub use infrastructure::http::{AppState, PushTiming, QuoteServer, ServerError, load_index};

// Providers
pub use infrastructure::providers::{GoogleFinanceProvider, YahooChartProvider, build_provider};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
