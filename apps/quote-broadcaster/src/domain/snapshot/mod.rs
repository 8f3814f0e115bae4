//! Snapshot Aggregation and Change Detection
//!
//! A `Snapshot` is the immutable result of one fetch round: every symbol
//! that fetched successfully, keyed by symbol. Failed symbols are simply
//! absent.
//!
//! # Change detection
//!
//! Snapshot equality compares the quote mapping only (symbol, price,
//! history) and ignores round ids and timestamps. `LastPublished` holds the
//! most recently broadcast snapshot; the scheduler is its only writer.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::convert::Infallible;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::quote::{FetchResult, Quote, QuoteView, Symbol};

/// Round id used for on-demand (poll) snapshots.
pub const POLL_ROUND_ID: u64 = 0;

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable aggregate of the quotes fetched in one round.
#[derive(Debug, Clone)]
pub struct Snapshot {
    quotes: BTreeMap<Symbol, Quote>,
    round_id: u64,
    created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Aggregate one round's fetch results into a snapshot.
    ///
    /// Only `Fetched` results are kept; failures are logged and dropped.
    /// The result does not depend on completion order: if a symbol somehow
    /// appears twice, the most recently fetched quote wins, with ties broken
    /// on price and then history.
    #[must_use]
    pub fn aggregate(results: impl IntoIterator<Item = FetchResult>, round_id: u64) -> Self {
        let mut quotes = BTreeMap::new();

        for result in results {
            match result {
                FetchResult::Fetched(quote) => match quotes.entry(quote.symbol.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(quote);
                    }
                    Entry::Occupied(mut slot) => {
                        if supersedes(&quote, slot.get()) {
                            slot.insert(quote);
                        }
                    }
                },
                FetchResult::Failed { symbol, reason } => {
                    tracing::debug!(round_id, symbol = %symbol, reason = %reason, "Dropping failed symbol from snapshot");
                }
            }
        }

        Self {
            quotes,
            round_id,
            created_at: Utc::now(),
        }
    }

    /// An empty snapshot (every fetch failed, or nothing requested).
    #[must_use]
    pub fn empty(round_id: u64) -> Self {
        Self::aggregate(std::iter::empty(), round_id)
    }

    /// Quotes keyed by symbol.
    #[must_use]
    pub const fn quotes(&self) -> &BTreeMap<Symbol, Quote> {
        &self.quotes
    }

    /// Look up one symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Quote> {
        self.quotes.get(symbol)
    }

    /// Number of symbols present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Whether no symbol is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Round that produced this snapshot.
    #[must_use]
    pub const fn round_id(&self) -> u64 {
        self.round_id
    }

    /// When the snapshot was built.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Deep equality of the quote mapping, ignoring round id and timestamps.
    #[must_use]
    pub fn same_quotes(&self, other: &Self) -> bool {
        self.quotes.len() == other.quotes.len()
            && self.quotes.iter().all(|(symbol, quote)| {
                other
                    .quotes
                    .get(symbol)
                    .is_some_and(|theirs| quote.same_market_data(theirs))
            })
    }

    /// Serialize the push payload: `{SYMBOL: {symbol, price[, history]}}`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if JSON encoding fails.
    pub fn to_push_json(&self, include_history: bool) -> Result<String, serde_json::Error> {
        let views: BTreeMap<&Symbol, QuoteView<'_>> = self
            .quotes
            .iter()
            .map(|(symbol, quote)| (symbol, quote.view(include_history)))
            .collect();
        serde_json::to_string(&views)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.quotes.serialize(serializer)
    }
}

/// Total order between two quotes for the same symbol.
fn supersedes(candidate: &Quote, current: &Quote) -> bool {
    candidate
        .fetched_at
        .cmp(&current.fetched_at)
        .then_with(|| candidate.price.cmp(&current.price))
        .then_with(|| candidate.history.cmp(&current.history))
        .is_gt()
}

// =============================================================================
// Change Detection
// =============================================================================

/// Decide whether `candidate` should be broadcast given the last published
/// snapshot.
///
/// Always true at startup (`previous` is `None`), including for an empty
/// candidate; afterwards true iff the quote mappings differ.
#[must_use]
pub fn should_publish(previous: Option<&Snapshot>, candidate: &Snapshot) -> bool {
    previous.is_none_or(|previous| !previous.same_quotes(candidate))
}

/// Process-wide cell holding the most recently broadcast snapshot.
///
/// Readers get a cheap `Arc` clone and never observe a partial update.
#[derive(Debug, Default)]
pub struct LastPublished {
    inner: RwLock<Option<Arc<Snapshot>>>,
}

impl LastPublished {
    /// Create an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, if anything has been published yet.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.inner.read().clone()
    }

    fn replace(&self, snapshot: Arc<Snapshot>) {
        *self.inner.write() = Some(snapshot);
    }
}

/// Applies `should_publish` against `LastPublished` and records accepted
/// snapshots.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: LastPublished,
}

impl ChangeDetector {
    /// Create a detector with nothing published.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate snapshot.
    ///
    /// Returns the snapshot to broadcast if it differs from the last
    /// published one, and records it as published. Returns `None` when the
    /// candidate is unchanged.
    pub fn offer(&self, candidate: Snapshot) -> Option<Arc<Snapshot>> {
        match self.offer_with(candidate, |_| Ok::<(), Infallible>(())) {
            Ok(Some(())) => self.last.get(),
            Ok(None) => None,
        }
    }

    /// Offer a candidate snapshot whose broadcast needs preparing first.
    ///
    /// When the candidate differs from the last published snapshot,
    /// `prepare` runs against it; the candidate is recorded as published
    /// only if `prepare` succeeds. Returns `Ok(None)` when unchanged.
    ///
    /// # Errors
    ///
    /// Returns the error from `prepare`; `LastPublished` is left untouched.
    pub fn offer_with<T, E>(
        &self,
        candidate: Snapshot,
        prepare: impl FnOnce(&Snapshot) -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        let previous = self.last.get();
        if !should_publish(previous.as_deref(), &candidate) {
            return Ok(None);
        }

        let prepared = prepare(&candidate)?;
        self.last.replace(Arc::new(candidate));
        Ok(Some(prepared))
    }

    /// Most recently published snapshot.
    #[must_use]
    pub fn last_published(&self) -> Option<Arc<Snapshot>> {
        self.last.get()
    }
}

// =============================================================================
// Tests
// =============================================================================
