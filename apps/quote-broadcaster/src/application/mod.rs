//! Application Layer - Use cases and port definitions.
//!
//! The quote provider port and the services that drive a fetch round:
//! bounded concurrent fetching and the periodic scheduler.

/// Port interfaces for upstream quote providers.
pub mod ports;

/// Fetcher and polling scheduler.
pub mod services;
