//! cex_feed.rs - Centralized exchange spot tickers
//!
//! One unauthenticated request returns every spot ticker; consumers match
//! symbols client-side by `SYMBOL-USDT` / `SYMBOL-USDC` instrument ids.

use async_trait::async_trait;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::models::CexTicker;
use crate::price_feed::{parse_decimal, parse_envelope, parse_millis, parse_optional_decimal};

pub const SPOT_TICKERS_PATH: &str = "/api/v5/market/tickers";

/// Quote currencies tried, in order, when matching a symbol to a ticker
pub const QUOTE_SUFFIXES: [&str; 2] = ["-USDT", "-USDC"];

#[async_trait]
pub trait TickerSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_tickers(&self) -> Result<Vec<CexTicker>, ProviderError>;
}

/// Find the ticker for `symbol`, preferring the USDT pair
pub fn match_ticker<'a>(symbol: &str, tickers: &'a HashMap<String, CexTicker>) -> Option<&'a CexTicker> {
    let symbol = symbol.to_uppercase();
    QUOTE_SUFFIXES
        .iter()
        .find_map(|suffix| tickers.get(&format!("{}{}", symbol, suffix)))
}

/// Index tickers by instrument id
pub fn index_tickers(tickers: Vec<CexTicker>) -> HashMap<String, CexTicker> {
    tickers
        .into_iter()
        .map(|t| (t.inst_id.to_uppercase(), t))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerItem {
    inst_id: String,
    last: String,
    #[serde(default)]
    bid_px: Option<String>,
    #[serde(default)]
    ask_px: Option<String>,
    #[serde(default)]
    vol24h: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

fn convert_ticker(item: TickerItem) -> Result<CexTicker, ProviderError> {
    let last = parse_decimal("last", &item.last)?;
    if last < Decimal::ZERO {
        return Err(ProviderError::Malformed(format!(
            "negative last price for {}",
            item.inst_id
        )));
    }

    Ok(CexTicker {
        last,
        bid: parse_optional_decimal("bidPx", item.bid_px.as_deref())?,
        ask: parse_optional_decimal("askPx", item.ask_px.as_deref())?,
        volume_24h: parse_optional_decimal("vol24h", item.vol24h.as_deref())?,
        observed_at: parse_millis("ts", item.ts.as_deref())?,
        inst_id: item.inst_id,
    })
}

/// Spot tickers from the exchange's public market API
pub struct ExchangeTickerFeed {
    name: String,
    base_url: String,
    timeout: Duration,
    http: Arc<dyn HttpClient>,
}

impl ExchangeTickerFeed {
    pub fn new(config: &ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        ExchangeTickerFeed {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            http,
        }
    }
}

#[async_trait]
impl TickerSource for ExchangeTickerFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_tickers(&self) -> Result<Vec<CexTicker>, ProviderError> {
        let query = vec![("instType".to_string(), "SPOT".to_string())];
        let response = self
            .http
            .get(&self.base_url, SPOT_TICKERS_PATH, &query, self.timeout)
            .await?
            .into_success()?;

        let items: Vec<TickerItem> = parse_envelope(&response.body)?;
        let total = items.len();
        let mut tickers = Vec::with_capacity(total);
        for item in items {
            let inst_id = item.inst_id.clone();
            match convert_ticker(item) {
                Ok(ticker) => tickers.push(ticker),
                Err(err) => debug!("{}: skipping ticker {}: {}", self.name, inst_id, err),
            }
        }

        // One bad instrument is skipped; a payload with nothing usable is not a ticker set.
        if tickers.is_empty() && total > 0 {
            return Err(ProviderError::Malformed(format!(
                "none of {} tickers could be parsed",
                total
            )));
        }
        if tickers.len() < total {
            warn!(
                "{}: skipped {}/{} unparseable tickers",
                self.name,
                total - tickers.len(),
                total
            );
        }
        Ok(tickers)
    }
}

/// Fixed ticker set for tests and demo runs
pub struct MockTickerFeed {
    name: String,
    tickers: Vec<CexTicker>,
    failure: Option<ProviderError>,
    latency: Duration,
    calls: AtomicUsize,
}

impl MockTickerFeed {
    pub fn new(name: &str) -> Self {
        MockTickerFeed {
            name: name.to_string(),
            tickers: Vec::new(),
            failure: None,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Tickers sitting a little off the demo on-chain market
    pub fn demo() -> Self {
        [
            ("ETH-USDT", Decimal::new(340910, 2), Decimal::new(182345, 1)),
            ("BTC-USDT", Decimal::new(6419500, 2), Decimal::new(91234, 1)),
            ("LINK-USDT", Decimal::new(1437, 2), Decimal::new(2103450, 1)),
            ("UNI-USDC", Decimal::new(1072, 2), Decimal::new(534120, 1)),
            ("AAVE-USDT", Decimal::new(15238, 2), Decimal::new(45210, 1)),
            ("PEPE-USDT", Decimal::new(1061, 8), Decimal::new(9_120_000_000_000, 1)),
            ("SOL-USDT", Decimal::new(14850, 2), Decimal::new(2874120, 1)),
            ("JUP-USDT", Decimal::new(8891, 4), Decimal::new(12003400, 1)),
            ("BNB-USDT", Decimal::new(57790, 2), Decimal::new(301220, 1)),
            ("CAKE-USDT", Decimal::new(2068, 3), Decimal::new(1892000, 1)),
        ]
        .into_iter()
        .fold(MockTickerFeed::new("mock-cex"), |feed, (inst, last, volume)| {
            feed.with_ticker(inst, last, Some(volume))
        })
    }

    pub fn with_ticker(mut self, inst_id: &str, last: Decimal, volume_24h: Option<Decimal>) -> Self {
        self.tickers.push(CexTicker {
            inst_id: inst_id.to_string(),
            last,
            bid: None,
            ask: None,
            volume_24h,
            observed_at: chrono::Utc::now(),
        });
        self
    }

    pub fn failing(mut self, err: ProviderError) -> Self {
        self.failure = Some(err);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TickerSource for MockTickerFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_tickers(&self) -> Result<Vec<CexTicker>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.tickers.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use rust_decimal_macros::dec;

    struct StaticHttp(HttpResponse);

    #[async_trait]
    impl HttpClient for StaticHttp {
        async fn get(
            &self,
            _base_url: &str,
            path: &str,
            query: &[(String, String)],
            _deadline: Duration,
        ) -> Result<HttpResponse, ProviderError> {
            assert_eq!(path, SPOT_TICKERS_PATH);
            assert_eq!(query, &[("instType".to_string(), "SPOT".to_string())]);
            Ok(self.0.clone())
        }

        async fn post_json(
            &self,
            _base_url: &str,
            _path: &str,
            _body: &serde_json::Value,
            _deadline: Duration,
        ) -> Result<HttpResponse, ProviderError> {
            Err(ProviderError::HttpStatus { status: 405 })
        }
    }

    fn feed(body: &str) -> ExchangeTickerFeed {
        let config = crate::config::EngineConfig::default();
        ExchangeTickerFeed::new(&config.cex, Arc::new(StaticHttp(HttpResponse::ok(body))))
    }

    #[tokio::test]
    async fn test_parses_spot_tickers() {
        let body = r#"{"code":"0","msg":"","data":[
            {"instType":"SPOT","instId":"SOL-USDT","last":"148.5","lastSz":"1","askPx":"148.51","bidPx":"148.49",
             "open24h":"150","high24h":"152","low24h":"147","volCcy24h":"1","vol24h":"2874120.5","ts":"1718000000000"},
            {"instType":"SPOT","instId":"DUST-USDT","last":"0.0001","askPx":"","bidPx":""}
        ]}"#;

        let tickers = feed(body).fetch_tickers().await.unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[0].last, dec!(148.5));
        assert_eq!(tickers[0].bid, Some(dec!(148.49)));
        assert_eq!(tickers[0].volume_24h, Some(dec!(2874120.5)));
        assert_eq!(tickers[1].ask, None);
    }

    #[tokio::test]
    async fn test_rejects_payload_without_usable_tickers() {
        for body in [
            r#"{"code":"0","msg":"","data":[{"instId":"SOL-USDT","last":"n/a"}]}"#,
            r#"{"code":"0","msg":"","data":[{"instId":"SOL-USDT"}]}"#,
            r#"{"code":"0","msg":""}"#,
        ] {
            let err = feed(body).fetch_tickers().await.unwrap_err();
            assert!(matches!(err, ProviderError::Malformed(_)), "{}: {:?}", body, err);
        }
    }

    #[tokio::test]
    async fn test_skips_unparseable_ticker_and_keeps_the_rest() {
        let body = r#"{"code":"0","msg":"","data":[
            {"instId":"SOL-USDT","last":"148.5"},
            {"instId":"NEWCOIN-USDT","last":""},
            {"instId":"ETH-USDT","last":"3400","bidPx":"oops"}
        ]}"#;

        let tickers = feed(body).fetch_tickers().await.unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].inst_id, "SOL-USDT");
        assert_eq!(tickers[0].last, dec!(148.5));
    }

    #[test]
    fn test_match_prefers_usdt_then_usdc() {
        let feed = MockTickerFeed::new("t")
            .with_ticker("ETH-USDC", dec!(2001), None)
            .with_ticker("ETH-USDT", dec!(2000), None)
            .with_ticker("UNI-USDC", dec!(10), None)
            .with_ticker("ARB-BTC", dec!(0.00001), None);
        let index = index_tickers(feed.tickers.clone());

        assert_eq!(match_ticker("eth", &index).map(|t| t.last), Some(dec!(2000)));
        assert_eq!(match_ticker("UNI", &index).map(|t| t.last), Some(dec!(10)));
        assert!(match_ticker("ARB", &index).is_none());
    }
}
