//! Health Check and Metrics Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (ready once a round has completed)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::application::services::SchedulerStatusView;
use crate::infrastructure::broadcast::BroadcastStats;
use crate::infrastructure::metrics::get_metrics_handle;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Symbols fetched each round.
    pub symbols: usize,
    /// Scheduler progress.
    pub scheduler: SchedulerStatusView,
    /// Push delivery statistics.
    pub broadcast: BroadcastStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Rounds completing with data.
    Healthy,
    /// Starting up, or the last round fetched nothing.
    Degraded,
    /// Every round so far has been abandoned.
    Unhealthy,
}

pub(super) async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.scheduler_status.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let scheduler = state.scheduler_status.view();

    HealthResponse {
        status: determine_health_status(&scheduler),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        symbols: state.symbols.len(),
        scheduler,
        broadcast: state.broadcaster.stats(),
    }
}

fn determine_health_status(scheduler: &SchedulerStatusView) -> HealthStatus {
    match &scheduler.last_round {
        None if scheduler.rounds_failed > 0 => HealthStatus::Unhealthy,
        None => HealthStatus::Degraded,
        Some(round) if round.fetched == 0 && round.failed > 0 => HealthStatus::Degraded,
        Some(_) => HealthStatus::Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::{RoundReport, SchedulerState};

    fn view(last_round: Option<RoundReport>, rounds_failed: u64) -> SchedulerStatusView {
        SchedulerStatusView {
            state: SchedulerState::Idle,
            rounds_completed: u64::from(last_round.is_some()),
            rounds_failed,
            last_round,
        }
    }

    fn round(fetched: usize, failed: usize) -> RoundReport {
        RoundReport {
            round_id: 1,
            fetched,
            failed,
            published: true,
            delivered: 0,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn starting_up_is_degraded() {
        assert_eq!(determine_health_status(&view(None, 0)), HealthStatus::Degraded);
    }

    #[test]
    fn only_failed_rounds_is_unhealthy() {
        assert_eq!(determine_health_status(&view(None, 2)), HealthStatus::Unhealthy);
    }

    #[test]
    fn all_symbols_failing_is_degraded() {
        assert_eq!(
            determine_health_status(&view(Some(round(0, 9)), 0)),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn partial_data_is_healthy() {
        assert_eq!(
            determine_health_status(&view(Some(round(7, 2)), 1)),
            HealthStatus::Healthy
        );
    }
}
