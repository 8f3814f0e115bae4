//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Rounds**: Fetch round outcomes and durations
//! - **Fetches**: Per-symbol fetch latency and failures by reason
//! - **Delivery**: Frames delivered to and dropped for subscribers
//! - **Subscribers**: Live subscriber gauge and evictions
//!
//! Metrics are exposed at `/metrics` on the HTTP port. Recording before
//! `init_metrics` is a no-op, so tests need no recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe all metrics.
///
/// Calling this again returns the already-installed handle.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_broadcaster_rounds_total",
        "Fetch rounds by outcome (published, unchanged, failed)"
    );
    describe_histogram!(
        "quote_broadcaster_round_duration_seconds",
        "Wall time of a full fetch round"
    );

    describe_counter!(
        "quote_broadcaster_fetch_failures_total",
        "Per-symbol fetch failures by reason"
    );
    describe_histogram!(
        "quote_broadcaster_fetch_duration_seconds",
        "Latency of a single symbol fetch"
    );

    describe_counter!(
        "quote_broadcaster_frames_delivered_total",
        "Snapshot frames queued to subscribers"
    );
    describe_counter!(
        "quote_broadcaster_frames_dropped_total",
        "Snapshot frames dropped for full subscriber queues"
    );

    describe_gauge!("quote_broadcaster_subscribers", "Live push subscribers");
    describe_counter!(
        "quote_broadcaster_subscribers_evicted_total",
        "Subscribers removed by the broadcaster, by reason"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Outcome label for a fetch round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Snapshot changed and was broadcast.
    Published,
    /// Snapshot equal to the last published one.
    Unchanged,
    /// Round abandoned with an error.
    Failed,
}

impl RoundOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        }
    }
}

/// Why the broadcaster removed a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Receiving side went away.
    Closed,
    /// Queue was full under the disconnect policy.
    Slow,
}

impl EvictionReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Slow => "slow",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record the outcome and duration of a round.
pub fn record_round(outcome: RoundOutcome, duration: Duration) {
    counter!("quote_broadcaster_rounds_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("quote_broadcaster_round_duration_seconds").record(duration.as_secs_f64());
}

/// Record a single symbol fetch latency.
pub fn record_fetch_duration(duration: Duration) {
    histogram!("quote_broadcaster_fetch_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed symbol fetch.
pub fn record_fetch_failure(reason: &'static str) {
    counter!("quote_broadcaster_fetch_failures_total", "reason" => reason).increment(1);
}

/// Record frames queued to subscribers.
pub fn record_frames_delivered(count: u64) {
    counter!("quote_broadcaster_frames_delivered_total").increment(count);
}

/// Record frames dropped for slow subscribers.
pub fn record_frames_dropped(count: u64) {
    counter!("quote_broadcaster_frames_dropped_total").increment(count);
}

/// Record a subscriber eviction.
pub fn record_eviction(reason: EvictionReason) {
    counter!("quote_broadcaster_subscribers_evicted_total", "reason" => reason.as_str())
        .increment(1);
}

/// Update the live subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("quote_broadcaster_subscribers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
