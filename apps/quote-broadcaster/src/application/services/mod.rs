//! Application Services
//!
//! - `QuoteFetcher`: bounded-concurrency fan-out/fan-in over a provider
//! - `PollingScheduler`: the periodic round loop

mod fetcher;
mod scheduler;

pub use fetcher::QuoteFetcher;
pub use scheduler::{
    PollingScheduler, RoundError, RoundReport, SchedulerState, SchedulerStatus,
    SchedulerStatusView,
};
