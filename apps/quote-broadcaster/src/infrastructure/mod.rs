//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete upstream providers, the push broadcaster, the HTTP surface and
//! the ambient configuration, logging and metrics setup.

/// Connection registry and snapshot fan-out.
pub mod broadcast;

/// Environment configuration.
pub mod config;

/// HTTP surface: poll, WebSocket, SSE, static assets, health.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Yahoo and Google Finance quote providers.
pub mod providers;

/// Tracing subscriber and OpenTelemetry setup.
pub mod telemetry;
