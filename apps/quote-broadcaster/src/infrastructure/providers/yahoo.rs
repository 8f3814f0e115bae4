//! Yahoo Finance chart API adapter.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{endpoint, get_checked, price_from_f64};
use crate::application::ports::{ProviderError, QuoteProvider};
use crate::domain::quote::{Quote, Symbol};

/// Quote provider over `GET /v8/finance/chart/{symbol}`.
///
/// Price is `meta.regularMarketPrice`, falling back to the last non-null
/// intraday close. History is every non-null close of the current day.
#[derive(Debug, Clone)]
pub struct YahooChartProvider {
    client: reqwest::Client,
    base_url: String,
    interval: String,
}

impl YahooChartProvider {
    /// Create a provider against `base_url` with the given bar interval.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, interval: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            interval: interval.to_string(),
        }
    }

    fn chart_url(&self, symbol: &Symbol) -> Result<reqwest::Url, ProviderError> {
        let mut url = endpoint(&self.base_url, &["v8", "finance", "chart", symbol.as_str()])?;
        url.query_pairs_mut()
            .append_pair("range", "1d")
            .append_pair("interval", &self.interval);
        Ok(url)
    }
}

#[async_trait]
impl QuoteProvider for YahooChartProvider {
    async fn fetch_symbol(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let response = match get_checked(&self.client, self.chart_url(symbol)?).await {
            Err(ProviderError::Status { status: 404, .. }) => {
                return Err(ProviderError::NotFound {
                    symbol: symbol.to_string(),
                });
            }
            other => other?,
        };

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        quote_from_chart(symbol, body.chart)
    }

    fn name(&self) -> &'static str {
        "yahoo"
    }
}

fn quote_from_chart(symbol: &Symbol, chart: Chart) -> Result<Quote, ProviderError> {
    if let Some(error) = chart.error {
        return Err(if error.code.eq_ignore_ascii_case("not found") {
            ProviderError::NotFound {
                symbol: symbol.to_string(),
            }
        } else {
            ProviderError::Parse(format!("{}: {}", error.code, error.description))
        });
    }

    let result = chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| ProviderError::NotFound {
            symbol: symbol.to_string(),
        })?;

    let history: Vec<Decimal> = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|series| {
            series
                .close
                .into_iter()
                .flatten()
                .filter_map(price_from_f64)
                .collect()
        })
        .unwrap_or_default();

    let price = result
        .meta
        .regular_market_price
        .and_then(price_from_f64)
        .or_else(|| history.last().copied())
        .ok_or_else(|| ProviderError::MissingPrice {
            symbol: symbol.to_string(),
        })?;

    Ok(Quote::new(symbol.clone(), price, history))
}

// API response types

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
}
