//! Quote Types
//!
//! Domain types for a single symbol's price at fetch time and the typed
//! outcome of fetching it from an upstream provider. A failed fetch is a
//! `FetchResult::Failed` value carried through to the aggregator.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};

// =============================================================================
// Symbol
// =============================================================================

/// Case-sensitive instrument identifier (stock ticker).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from any string-like value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Price and intraday history for one symbol, as observed in one fetch.
///
/// Serializes to the client wire shape `{symbol, price, history?}`; the
/// fetch timestamp is internal and `history` is omitted when empty.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Last price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Intraday closes in time order (may be empty).
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "serialize_decimals"
    )]
    pub history: Vec<Decimal>,
    /// When the quote was fetched.
    #[serde(skip)]
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    /// Create a quote stamped with the current time.
    #[must_use]
    pub fn new(symbol: Symbol, price: Decimal, history: Vec<Decimal>) -> Self {
        Self {
            symbol,
            price,
            history,
            fetched_at: Utc::now(),
        }
    }

    /// Compare the observable market data of two quotes, ignoring fetch time.
    #[must_use]
    pub fn same_market_data(&self, other: &Self) -> bool {
        self.symbol == other.symbol && self.price == other.price && self.history == other.history
    }

    /// Borrow a view of this quote for push payloads.
    #[must_use]
    pub fn view(&self, include_history: bool) -> QuoteView<'_> {
        QuoteView {
            symbol: &self.symbol,
            price: self.price,
            history: include_history.then_some(self.history.as_slice()),
        }
    }
}

/// Borrowed wire view of a quote with optional history.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuoteView<'a> {
    /// Instrument symbol.
    pub symbol: &'a Symbol,
    /// Last price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Intraday closes, present only when history is enabled.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_decimals"
    )]
    pub history: Option<&'a [Decimal]>,
}

fn serialize_decimals<S: Serializer>(values: &[Decimal], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(values.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)))
}

#[allow(clippy::ref_option)]
fn serialize_optional_decimals<S: Serializer>(
    values: &Option<&[Decimal]>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_decimals((*values).unwrap_or_default(), serializer)
}

// =============================================================================
// Fetch Result
// =============================================================================

/// Why a single symbol's fetch produced no quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The per-symbol timeout elapsed.
    Timeout,
    /// The upstream provider returned an error.
    Upstream(String),
}

impl FailureReason {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Upstream(_) => "upstream",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Upstream(message) => f.write_str(message),
        }
    }
}

/// Outcome of fetching one symbol in one round.
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// The provider returned a quote.
    Fetched(Quote),
    /// The fetch failed; the symbol is absent from the round's snapshot.
    Failed {
        /// Symbol that failed.
        symbol: Symbol,
        /// Failure cause.
        reason: FailureReason,
    },
}

impl FetchResult {
    /// Symbol this result is for.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Fetched(quote) => &quote.symbol,
            Self::Failed { symbol, .. } => symbol,
        }
    }

    /// Whether the fetch produced a quote.
    #[must_use]
    pub const fn is_fetched(&self) -> bool {
        matches!(self, Self::Fetched(_))
    }
}

// =============================================================================
// Tests
// =============================================================================
