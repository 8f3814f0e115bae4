//! Configuration Module
//!
//! Environment-driven configuration for the quote broadcaster.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, DEFAULT_SYMBOLS, FetchSettings, ProviderKind,
    ProviderSettings, ServerSettings, ServiceConfig, SlowConsumerPolicy,
};
