//! Polling Scheduler
//!
//! Drives fetch rounds in a single background task:
//!
//! ```text
//! Idle -> Fetching -> Publishing -> Idle -> (sleep interval) -> ...
//! ```
//!
//! The delay is measured from the end of one round to the start of the
//! next. A round that errors or panics is logged and the loop moves on.
//! Cancellation aborts an in-flight round at its next suspension point;
//! the publish step itself never suspends, so `LastPublished` and the
//! broadcaster see either the whole round or none of it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::fetcher::QuoteFetcher;
use crate::domain::quote::Symbol;
use crate::domain::snapshot::{ChangeDetector, Snapshot};
use crate::infrastructure::broadcast::{BroadcastError, Broadcaster, PublishReport};
use crate::infrastructure::metrics::{self, RoundOutcome};

/// Round-level error. Per-symbol failures never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    /// The changed snapshot could not be serialized for push delivery.
    #[error("Failed to publish snapshot: {0}")]
    Serialize(#[from] BroadcastError),
    /// The round panicked.
    #[error("Round panicked: {0}")]
    Panicked(String),
}

// =============================================================================
// Status
// =============================================================================

/// Scheduler state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Between rounds.
    #[default]
    Idle,
    /// Waiting on the fetcher.
    Fetching,
    /// Aggregating, detecting and broadcasting.
    Publishing,
}

/// Summary of a completed round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    /// Round id.
    pub round_id: u64,
    /// Symbols present in the snapshot.
    pub fetched: usize,
    /// Symbols that failed or timed out.
    pub failed: usize,
    /// Whether the snapshot was broadcast.
    pub published: bool,
    /// Subscribers the frame was queued to (0 when unchanged).
    pub delivered: usize,
    /// When the round finished.
    pub completed_at: DateTime<Utc>,
}

/// Point-in-time view of the scheduler for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatusView {
    /// Current state.
    pub state: SchedulerState,
    /// Rounds that finished without error.
    pub rounds_completed: u64,
    /// Rounds abandoned with an error.
    pub rounds_failed: u64,
    /// Last successful round.
    pub last_round: Option<RoundReport>,
}

/// Shared, lock-protected scheduler status.
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    state: RwLock<SchedulerState>,
    rounds_completed: AtomicU64,
    rounds_failed: AtomicU64,
    last_round: RwLock<Option<RoundReport>>,
}

impl SchedulerStatus {
    /// Create an idle status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.write() = state;
    }

    fn record_success(&self, report: &RoundReport) {
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
        *self.last_round.write() = Some(report.clone());
    }

    fn record_failure(&self) {
        self.rounds_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    /// Rounds that finished without error.
    #[must_use]
    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Relaxed)
    }

    /// Rounds abandoned with an error.
    #[must_use]
    pub fn rounds_failed(&self) -> u64 {
        self.rounds_failed.load(Ordering::Relaxed)
    }

    /// Whether at least one round has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.rounds_completed() > 0
    }

    /// Snapshot of the status for serialization.
    #[must_use]
    pub fn view(&self) -> SchedulerStatusView {
        SchedulerStatusView {
            state: self.state(),
            rounds_completed: self.rounds_completed(),
            rounds_failed: self.rounds_failed(),
            last_round: self.last_round.read().clone(),
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Periodic fetch → aggregate → detect → publish loop.
#[derive(Debug)]
pub struct PollingScheduler {
    fetcher: QuoteFetcher,
    symbols: Arc<[Symbol]>,
    detector: Arc<ChangeDetector>,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
    status: Arc<SchedulerStatus>,
    next_round: AtomicU64,
}

impl PollingScheduler {
    /// Create a scheduler. Round ids start at 1.
    #[must_use]
    pub fn new(
        fetcher: QuoteFetcher,
        symbols: impl Into<Arc<[Symbol]>>,
        detector: Arc<ChangeDetector>,
        broadcaster: Arc<Broadcaster>,
        interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            symbols: symbols.into(),
            detector,
            broadcaster,
            interval,
            status: Arc::new(SchedulerStatus::new()),
            next_round: AtomicU64::new(1),
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<SchedulerStatus> {
        Arc::clone(&self.status)
    }

    /// Run rounds until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            symbols = self.symbols.len(),
            interval_secs = self.interval.as_secs(),
            concurrency_limit = self.fetcher.concurrency_limit(),
            "Polling scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = self.run_round() => {}
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        self.status.set_state(SchedulerState::Idle);
        tracing::info!("Polling scheduler stopped");
    }

    /// Execute one round. Errors and panics are logged, counted and
    /// returned; they never propagate as a panic.
    ///
    /// # Errors
    ///
    /// Returns `RoundError` if the round was abandoned.
    pub async fn run_round(&self) -> Result<RoundReport, RoundError> {
        let round_id = self.next_round.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.execute_round(round_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(RoundError::Panicked(panic_message(payload.as_ref()))));
        self.status.set_state(SchedulerState::Idle);

        match &outcome {
            Ok(report) => {
                let label = if report.published {
                    RoundOutcome::Published
                } else {
                    RoundOutcome::Unchanged
                };
                metrics::record_round(label, started.elapsed());
                self.status.record_success(report);
                tracing::info!(
                    round_id,
                    fetched = report.fetched,
                    failed = report.failed,
                    published = report.published,
                    delivered = report.delivered,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Round complete"
                );
            }
            Err(e) => {
                metrics::record_round(RoundOutcome::Failed, started.elapsed());
                self.status.record_failure();
                tracing::error!(round_id, error = %e, "Round abandoned");
            }
        }

        outcome
    }

    async fn execute_round(&self, round_id: u64) -> Result<RoundReport, RoundError> {
        self.status.set_state(SchedulerState::Fetching);
        let results = self.fetcher.fetch_all(&self.symbols).await;

        self.status.set_state(SchedulerState::Publishing);
        let failed = results.iter().filter(|r| !r.is_fetched()).count();
        let snapshot = Snapshot::aggregate(results, round_id);
        let fetched = snapshot.len();

        let delivery = self
            .detector
            .offer_with(snapshot, |candidate| self.broadcaster.encode(candidate))?
            .map(|frame| self.broadcaster.publish_frame(frame));

        Ok(RoundReport {
            round_id,
            fetched,
            failed,
            published: delivery.is_some(),
            delivered: delivery.map_or(0, |report: PublishReport| report.delivered),
            completed_at: Utc::now(),
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
