//! Google Finance quote page scraper.

use std::str::FromStr;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;

use super::{endpoint, get_checked};
use crate::application::ports::{ProviderError, QuoteProvider};
use crate::domain::quote::{Quote, Symbol};

const PRICE_PATTERN: &str = r#"<div class="YMlKec fxKbKc"[^>]*>([^<]+)</div>"#;

/// Quote provider scraping `GET /finance/quote/{symbol}:{exchange}`.
///
/// Only the headline price is available; history is always empty.
#[derive(Debug, Clone)]
pub struct GoogleFinanceProvider {
    client: reqwest::Client,
    base_url: String,
    exchange: String,
    price_pattern: Regex,
}

impl GoogleFinanceProvider {
    /// Create a provider against `base_url` for symbols on `exchange`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Parse` if the price pattern fails to compile.
    pub fn new(client: reqwest::Client, base_url: &str, exchange: &str) -> Result<Self, ProviderError> {
        let price_pattern =
            Regex::new(PRICE_PATTERN).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            exchange: exchange.to_string(),
            price_pattern,
        })
    }

    fn quote_url(&self, symbol: &Symbol) -> Result<reqwest::Url, ProviderError> {
        let page = format!("{symbol}:{}", self.exchange);
        endpoint(&self.base_url, &["finance", "quote", &page])
    }

    fn extract_price(&self, symbol: &Symbol, html: &str) -> Result<Decimal, ProviderError> {
        let missing = || ProviderError::MissingPrice {
            symbol: symbol.to_string(),
        };

        let text = self
            .price_pattern
            .captures(html)
            .and_then(|captures| captures.get(1))
            .ok_or_else(missing)?
            .as_str();

        let numeric: String = text
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if numeric.is_empty() {
            return Err(missing());
        }

        Decimal::from_str(&numeric)
            .map(|price| price.round_dp(2))
            .map_err(|e| ProviderError::Parse(format!("price {text:?}: {e}")))
    }
}

#[async_trait]
impl QuoteProvider for GoogleFinanceProvider {
    async fn fetch_symbol(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let html = get_checked(&self.client, self.quote_url(symbol)?)
            .await?
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let price = self.extract_price(symbol, &html)?;
        Ok(Quote::new(symbol.clone(), price, Vec::new()))
    }

    fn name(&self) -> &'static str {
        "google"
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn provider() -> GoogleFinanceProvider {
        GoogleFinanceProvider::new(reqwest::Client::new(), "https://www.google.com/", "NASDAQ")
            .unwrap()
    }

    #[test_case(r#"<div class="YMlKec fxKbKc">$189.84</div>"#, Decimal::new(18984, 2) ; "dollar sign")]
    #[test_case(r#"<div class="YMlKec fxKbKc">$1,024.50</div>"#, Decimal::new(102_450, 2) ; "thousands separator")]
    #[test_case(r#"<span><div class="YMlKec fxKbKc" jsname="ip75Cb">€42.1</div></span>"#, Decimal::new(4210, 2) ; "extra attributes")]
    fn extracts_price(html: &str, expected: Decimal) {
        let price = provider().extract_price(&Symbol::new("AAPL"), html).unwrap();
        assert_eq!(price, expected);
    }

    #[test]
    fn missing_element() {
        let err = provider()
            .extract_price(&Symbol::new("AAPL"), "<html><body>nothing</body></html>")
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingPrice { symbol } if symbol == "AAPL"));
    }

    #[test]
    fn url_shape() {
        assert_eq!(
            provider().quote_url(&Symbol::new("TSLA")).unwrap().as_str(),
            "https://www.google.com/finance/quote/TSLA:NASDAQ"
        );
    }

    #[test]
    fn symbol_is_escaped_in_url() {
        assert_eq!(
            provider().quote_url(&Symbol::new("A/B?#")).unwrap().as_str(),
            "https://www.google.com/finance/quote/A%2FB%3F%23:NASDAQ"
        );
    }
}
