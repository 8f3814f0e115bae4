//! Upstream Quote Providers
//!
//! `QuoteProvider` adapters over a shared `reqwest` client:
//!
//! - `YahooChartProvider`: Yahoo Finance chart API (price + intraday closes)
//! - `GoogleFinanceProvider`: Google Finance quote page scrape (price only)
//!
//! Each request carries a browser `User-Agent` picked at random. Providers
//! never retry; the fetcher's timeout bounds every call.

mod google;
mod yahoo;

use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;

pub use google::GoogleFinanceProvider;
pub use yahoo::YahooChartProvider;

use crate::application::ports::{ProviderError, QuoteProvider};
use crate::infrastructure::config::{ProviderKind, ProviderSettings};

/// Browser user agents rotated across upstream requests.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
];

/// Pick a user agent at random.
#[must_use]
pub fn random_user_agent() -> &'static str {
    let index = rand::rng().random_range(0..USER_AGENTS.len());
    USER_AGENTS[index]
}

/// Build the HTTP client shared by the providers.
///
/// # Errors
///
/// Returns `ProviderError::Network` if the TLS backend fails to initialise.
pub fn build_http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| ProviderError::Network(e.to_string()))
}

/// Build the provider selected by `settings.kind`.
///
/// # Errors
///
/// Returns `ProviderError` if the HTTP client or scraper cannot be built.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn QuoteProvider>, ProviderError> {
    let client = build_http_client()?;
    let provider: Arc<dyn QuoteProvider> = match settings.kind {
        ProviderKind::Yahoo => Arc::new(YahooChartProvider::new(
            client,
            &settings.yahoo_base_url,
            &settings.yahoo_interval,
        )),
        ProviderKind::Google => Arc::new(GoogleFinanceProvider::new(
            client,
            &settings.google_base_url,
            &settings.google_exchange,
        )?),
    };
    Ok(provider)
}

/// Append path segments to `base_url`, percent-encoding each one.
fn endpoint(base_url: &str, segments: &[&str]) -> Result<reqwest::Url, ProviderError> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| ProviderError::Parse(format!("base url {base_url:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ProviderError::Parse(format!("base url {base_url:?} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Send a GET with a rotated user agent; non-2xx becomes `Status`.
async fn get_checked(
    client: &reqwest::Client,
    url: reqwest::Url,
) -> Result<reqwest::Response, ProviderError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, random_user_agent())
        .send()
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(256)
            .collect();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// Convert an upstream float price to a 2dp decimal.
fn price_from_f64(value: f64) -> Option<Decimal> {
    Decimal::try_from(value).ok().map(|d| d.round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_is_from_list() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[test]
    fn price_rounding() {
        assert_eq!(price_from_f64(150.126), Some(Decimal::new(15013, 2)));
        assert_eq!(price_from_f64(f64::NAN), None);
    }

    #[test]
    fn endpoint_escapes_segments() {
        let url = endpoint("http://localhost:1/api", &["quote", "BRK/B#1"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:1/api/quote/BRK%2FB%231");
    }

    #[test]
    fn endpoint_rejects_bad_base() {
        assert!(matches!(
            endpoint("not a url", &["x"]),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn builds_selected_provider() {
        let mut settings = ProviderSettings::default();
        assert_eq!(build_provider(&settings).unwrap().name(), "yahoo");

        settings.kind = ProviderKind::Google;
        assert_eq!(build_provider(&settings).unwrap().name(), "google");
    }
}
