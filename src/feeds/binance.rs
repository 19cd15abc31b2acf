//! Binance spot ticker price source.
//!
//! Single REST call per sample; the upstream endpoint has no timeout of
//! its own, so the client carries an explicit one.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::feeds::PriceSource;
use crate::models::RoundError;

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

pub struct BinanceTicker {
    client: reqwest::Client,
    base_url: String,
    symbol: String,
}

impl BinanceTicker {
    pub fn new(base_url: &str, symbol: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for BinanceTicker {
    async fn current_price(&self) -> Result<f64, RoundError> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url, self.symbol
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RoundError::PriceUnavailable(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(RoundError::PriceUnavailable(format!(
                "ticker returned HTTP {}",
                response.status()
            )));
        }

        let ticker: TickerResponse = response
            .json()
            .await
            .map_err(|e| RoundError::PriceUnavailable(format!("bad ticker payload: {e}")))?;

        let price = parse_price(&ticker.price)?;
        debug!(symbol = %self.symbol, price, "fetched spot price");
        Ok(price)
    }
}

fn parse_price(raw: &str) -> Result<f64, RoundError> {
    let price: f64 = raw
        .parse()
        .map_err(|_| RoundError::PriceUnavailable(format!("non-numeric price: {raw:?}")))?;

    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(RoundError::PriceUnavailable(format!(
            "out-of-range price: {raw:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_ticker_strings() {
        assert_eq!(parse_price("2543.87000000").unwrap(), 2543.87);
        assert_eq!(parse_price("0.5").unwrap(), 0.5);
    }

    #[test]
    fn rejects_garbage_and_out_of_range_values() {
        for raw in ["", "abc", "NaN", "inf", "0", "-12.5"] {
            let err = parse_price(raw).unwrap_err();
            assert!(matches!(err, RoundError::PriceUnavailable(_)), "{raw}");
        }
    }

    #[test]
    fn ticker_payload_deserializes() {
        let ticker: TickerResponse =
            serde_json::from_str(r#"{"symbol":"ETHUSDT","price":"2543.87000000"}"#).unwrap();
        assert_eq!(parse_price(&ticker.price).unwrap(), 2543.87);
    }
}
