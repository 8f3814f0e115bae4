//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use quote_broadcaster::{ProviderError, Quote, QuoteFetcher, QuoteProvider, Symbol};

/// Provider whose answers are set by the test.
///
/// Symbols without a scripted price fail with `NotFound`.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    prices: RwLock<HashMap<String, Decimal>>,
}

impl ScriptedProvider {
    pub fn with_prices(prices: &[(&str, i64)]) -> Arc<Self> {
        let provider = Self::default();
        for (symbol, cents) in prices {
            provider.set_price(symbol, *cents);
        }
        Arc::new(provider)
    }

    /// Set `symbol` to `cents / 100`.
    pub fn set_price(&self, symbol: &str, cents: i64) {
        self.prices
            .write()
            .insert(symbol.to_string(), Decimal::new(cents, 2));
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    async fn fetch_symbol(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let price = self.prices.read().get(symbol.as_str()).copied();
        price
            .map(|price| Quote::new(symbol.clone(), price, Vec::new()))
            .ok_or_else(|| ProviderError::NotFound {
                symbol: symbol.to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn symbols(names: &[&str]) -> Vec<Symbol> {
    names.iter().copied().map(Symbol::from).collect()
}

pub fn fetcher(provider: Arc<ScriptedProvider>) -> QuoteFetcher {
    QuoteFetcher::new(provider, 4, Duration::from_secs(1))
}
