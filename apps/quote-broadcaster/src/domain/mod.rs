//! Domain Layer - Quote and snapshot types.
//!
//! Pure types for one fetch round: per-symbol quotes, typed fetch outcomes,
//! the aggregated snapshot and the change-detection rule that decides
//! whether a snapshot is broadcast.

/// Quote, symbol and per-symbol fetch outcome types.
pub mod quote;

/// Snapshot aggregation and change detection.
pub mod snapshot;
