//! Port Interfaces
//!
//! Driven ports the application services depend on. Infrastructure
//! adapters (Yahoo chart API, Google Finance page) implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteProvider`: Fetch the current quote for one symbol

use async_trait::async_trait;

use crate::domain::quote::{Quote, Symbol};

/// Quote provider error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Transport failure (connect, TLS, read).
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered with a non-success HTTP status.
    #[error("Upstream returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// Response could not be parsed.
    #[error("Failed to parse upstream response: {0}")]
    Parse(String),

    /// Response parsed but carried no price.
    #[error("No price in upstream response for {symbol}")]
    MissingPrice {
        /// Symbol requested.
        symbol: String,
    },

    /// Upstream does not know the symbol.
    #[error("Symbol not found: {symbol}")]
    NotFound {
        /// Symbol requested.
        symbol: String,
    },
}

impl ProviderError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::Parse(_) => "parse",
            Self::MissingPrice { .. } => "missing_price",
            Self::NotFound { .. } => "not_found",
        }
    }
}

/// Port for fetching the current quote of a single symbol.
///
/// Implementations may block on network I/O; callers bound each call with
/// their own timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch the latest price (and intraday history, if available).
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the upstream is unreachable, answers with
    /// an error, or the response carries no usable price.
    async fn fetch_symbol(&self, symbol: &Symbol) -> Result<Quote, ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(ProviderError::Network("reset".into()).kind(), "network");
        assert_eq!(
            ProviderError::Status {
                status: 503,
                body: String::new()
            }
            .kind(),
            "status"
        );
        assert_eq!(
            ProviderError::NotFound {
                symbol: "ZZZZ".into()
            }
            .to_string(),
            "Symbol not found: ZZZZ"
        );
    }
}
