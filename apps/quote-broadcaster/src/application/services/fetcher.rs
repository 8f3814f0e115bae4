//! Quote Fetcher
//!
//! Fans one round's symbols out to the quote provider with bounded
//! concurrency and a per-symbol timeout, then fans back in. Every symbol
//! resolves to exactly one `FetchResult`; provider errors and timeouts
//! never fail the round.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;

use crate::application::ports::QuoteProvider;
use crate::domain::quote::{FailureReason, FetchResult, Symbol};
use crate::infrastructure::metrics;

/// Bounded-concurrency fetcher over a `QuoteProvider`.
#[derive(Clone)]
pub struct QuoteFetcher {
    provider: Arc<dyn QuoteProvider>,
    concurrency_limit: usize,
    fetch_timeout: Duration,
}

impl std::fmt::Debug for QuoteFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteFetcher")
            .field("provider", &self.provider.name())
            .field("concurrency_limit", &self.concurrency_limit)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl QuoteFetcher {
    /// Create a fetcher. A zero limit is treated as one.
    #[must_use]
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        concurrency_limit: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            concurrency_limit: concurrency_limit.max(1),
            fetch_timeout,
        }
    }

    /// Maximum in-flight provider calls.
    #[must_use]
    pub const fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Fetch every distinct symbol in `symbols`.
    ///
    /// At most `concurrency_limit` provider calls are in flight at once.
    /// Returns after every symbol has resolved, one result per distinct
    /// symbol in first-occurrence order.
    pub async fn fetch_all(&self, symbols: &[Symbol]) -> Vec<FetchResult> {
        let mut seen = HashSet::with_capacity(symbols.len());
        let unique: Vec<Symbol> = symbols
            .iter()
            .filter(|s| seen.insert(*s))
            .cloned()
            .collect();

        let mut results: Vec<(usize, FetchResult)> = stream::iter(unique.into_iter().enumerate())
            .map(|(index, symbol)| async move { (index, self.fetch_one(&symbol).await) })
            .buffer_unordered(self.concurrency_limit)
            .collect()
            .await;

        results.sort_unstable_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    async fn fetch_one(&self, symbol: &Symbol) -> FetchResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.fetch_timeout, self.provider.fetch_symbol(symbol)).await;
        metrics::record_fetch_duration(started.elapsed());

        let reason = match outcome {
            Ok(Ok(quote)) => return FetchResult::Fetched(quote),
            Ok(Err(e)) => {
                tracing::warn!(
                    symbol = %symbol,
                    provider = self.provider.name(),
                    error_kind = e.kind(),
                    error = %e,
                    "Quote fetch failed"
                );
                FailureReason::Upstream(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    symbol = %symbol,
                    provider = self.provider.name(),
                    timeout_ms = u64::try_from(self.fetch_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Quote fetch timed out"
                );
                FailureReason::Timeout
            }
        };

        metrics::record_fetch_failure(reason.kind());
        FetchResult::Failed {
            symbol: symbol.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MockQuoteProvider, ProviderError};
    use crate::domain::quote::Quote;

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().copied().map(Symbol::from).collect()
    }

    fn quote_for(symbol: &Symbol) -> Quote {
        Quote::new(symbol.clone(), Decimal::new(10_000, 2), vec![])
    }

    #[tokio::test]
    async fn all_symbols_resolve_in_request_order() {
        let mut provider = MockQuoteProvider::new();
        provider
            .expect_fetch_symbol()
            .returning(|symbol| Ok(quote_for(symbol)));
        provider.expect_name().return_const("mock");

        let fetcher = QuoteFetcher::new(Arc::new(provider), 2, Duration::from_secs(1));
        let results = fetcher.fetch_all(&symbols(&["AAPL", "MSFT", "TSLA"])).await;

        let order: Vec<&str> = results.iter().map(|r| r.symbol().as_str()).collect();
        assert_eq!(order, vec!["AAPL", "MSFT", "TSLA"]);
        assert!(results.iter().all(FetchResult::is_fetched));
    }

    #[tokio::test]
    async fn provider_errors_become_failed_results() {
        let mut provider = MockQuoteProvider::new();
        provider.expect_fetch_symbol().returning(|symbol| {
            if symbol.as_str() == "BA" {
                Err(ProviderError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(quote_for(symbol))
            }
        });
        provider.expect_name().return_const("mock");

        let fetcher = QuoteFetcher::new(Arc::new(provider), 8, Duration::from_secs(1));
        let results = fetcher.fetch_all(&symbols(&["AAPL", "BA"])).await;

        assert!(results[0].is_fetched());
        match &results[1] {
            FetchResult::Failed { symbol, reason } => {
                assert_eq!(symbol.as_str(), "BA");
                assert!(matches!(reason, FailureReason::Upstream(m) if m.contains("503")));
            }
            FetchResult::Fetched(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn duplicate_symbols_are_fetched_once() {
        let mut provider = MockQuoteProvider::new();
        provider
            .expect_fetch_symbol()
            .times(2)
            .returning(|symbol| Ok(quote_for(symbol)));
        provider.expect_name().return_const("mock");

        let fetcher = QuoteFetcher::new(Arc::new(provider), 4, Duration::from_secs(1));
        let results = fetcher.fetch_all(&symbols(&["AAPL", "AAPL", "MSFT"])).await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn empty_symbol_set() {
        let provider = MockQuoteProvider::new();
        let fetcher = QuoteFetcher::new(Arc::new(provider), 4, Duration::from_secs(1));
        assert!(fetcher.fetch_all(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn fetch_all_runs_on_spawned_task() {
        let mut provider = MockQuoteProvider::new();
        provider
            .expect_fetch_symbol()
            .returning(|symbol| Ok(quote_for(symbol)));
        provider.expect_name().return_const("mock");

        let fetcher = QuoteFetcher::new(Arc::new(provider), 2, Duration::from_secs(1));
        let requested = symbols(&["AAPL", "MSFT"]);
        let handle = tokio::spawn(async move { fetcher.fetch_all(&requested).await });

        let results = handle.await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(FetchResult::is_fetched));
    }

    #[test]
    fn zero_limit_is_clamped() {
        let fetcher = QuoteFetcher::new(
            Arc::new(MockQuoteProvider::new()),
            0,
            Duration::from_secs(1),
        );
        assert_eq!(fetcher.concurrency_limit(), 1);
    }

    /// Provider that tracks how many calls are in flight at once.
    struct GaugedProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
        slow_symbol: Option<&'static str>,
    }

    impl GaugedProvider {
        fn new(delay: Duration, slow_symbol: Option<&'static str>) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
                slow_symbol,
            }
        }
    }

    #[async_trait]
    impl QuoteProvider for GaugedProvider {
        async fn fetch_symbol(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = if self.slow_symbol == Some(symbol.as_str()) {
                Duration::from_secs(60)
            } else {
                self.delay
            };
            tokio::time::sleep(delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(quote_for(symbol))
        }

        fn name(&self) -> &'static str {
            "gauged"
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let provider = Arc::new(GaugedProvider::new(Duration::from_millis(20), None));
        let fetcher = QuoteFetcher::new(provider.clone(), 3, Duration::from_secs(5));

        let names: Vec<String> = (0..12).map(|i| format!("SYM{i}")).collect();
        let requested: Vec<Symbol> = names.iter().map(|n| Symbol::new(n.as_str())).collect();
        let results = fetcher.fetch_all(&requested).await;

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(FetchResult::is_fetched));
        let peak = provider.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight {peak} exceeded limit");
        assert!(peak >= 2, "fetches never overlapped");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_isolated_to_one_symbol() {
        let provider = Arc::new(GaugedProvider::new(Duration::from_millis(10), Some("SLOW")));
        let fetcher = QuoteFetcher::new(provider, 4, Duration::from_millis(500));

        let results = fetcher.fetch_all(&symbols(&["AAPL", "SLOW", "MSFT"])).await;

        assert!(results[0].is_fetched());
        assert!(matches!(
            &results[1],
            FetchResult::Failed { reason: FailureReason::Timeout, .. }
        ));
        assert!(results[2].is_fetched());
    }
}
