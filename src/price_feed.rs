//! price_feed.rs - On-chain aggregator price source and token catalog
//!
//! `DexAggregatorFeed` talks to the DEX aggregator's market API. Every
//! response goes through a validating parse that rejects unexpected shapes
//! instead of letting half-parsed values into the pipeline.
//! `MockPriceFeed` is a scripted in-memory market for tests and demo runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::models::{ChainDescriptor, PriceQuote, TokenDescriptor, TokenKey, WindowedValues};

const PRICE_INFO_PATH: &str = "/api/v5/dex/market/price-info";
pub const SUPPORTED_CHAINS_PATH: &str = "/api/v5/dex/aggregator/supported/chain";
pub const ALL_TOKENS_PATH: &str = "/api/v5/dex/aggregator/all-tokens";

/// Batch price lookups against one provider
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Provider name, used in cache keys and quotes
    fn name(&self) -> &str;

    /// One provider call for all `tokens`. Tokens the provider has no data
    /// for are simply missing from the returned list.
    async fn fetch_batch(&self, tokens: &[TokenKey]) -> Result<Vec<PriceQuote>, ProviderError>;
}

/// Chain and token reference data
#[async_trait]
pub trait TokenCatalog: Send + Sync {
    async fn fetch_chains(&self) -> Result<Vec<ChainDescriptor>, ProviderError>;

    async fn fetch_tokens(&self, chain_index: &str) -> Result<Vec<TokenDescriptor>, ProviderError>;
}

// ============================================================================
// Provider response structures
// ============================================================================

/// Scalars the provider sends either quoted or bare
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: Scalar,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

/// Unwrap a `{code, data, msg}` envelope. Anything but code `"0"` with data
/// present is an error.
pub(crate) fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    let envelope: Envelope<T> =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let code = envelope.code.into_string();
    if code != "0" {
        return Err(ProviderError::Api {
            code,
            msg: envelope.msg,
        });
    }

    envelope
        .data
        .ok_or_else(|| ProviderError::Malformed("missing data field".to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceInfoItem {
    chain_index: Scalar,
    token_contract_address: String,
    price: String,
    #[serde(rename = "priceChange5M", default)]
    price_change_5m: Option<String>,
    #[serde(rename = "priceChange1H", default)]
    price_change_1h: Option<String>,
    #[serde(rename = "priceChange4H", default)]
    price_change_4h: Option<String>,
    #[serde(rename = "priceChange24H", default)]
    price_change_24h: Option<String>,
    #[serde(rename = "volume5M", default)]
    volume_5m: Option<String>,
    #[serde(rename = "volume1H", default)]
    volume_1h: Option<String>,
    #[serde(rename = "volume4H", default)]
    volume_4h: Option<String>,
    #[serde(rename = "volume24H", default)]
    volume_24h: Option<String>,
    #[serde(default)]
    market_cap: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainItem {
    #[serde(default)]
    chain_index: Option<Scalar>,
    #[serde(default)]
    chain_id: Option<Scalar>,
    chain_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenItem {
    decimals: Scalar,
    token_contract_address: String,
    token_symbol: String,
}

pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, ProviderError> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| ProviderError::Malformed(format!("{}: not a number: {:?}", field, raw)))
}

/// Empty strings mean "not reported"
pub(crate) fn parse_optional_decimal(
    field: &str,
    raw: Option<&str>,
) -> Result<Option<Decimal>, ProviderError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_decimal(field, value).map(Some),
    }
}

pub(crate) fn parse_millis(field: &str, raw: Option<&str>) -> Result<DateTime<Utc>, ProviderError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Utc::now()),
        Some(value) => value
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| ProviderError::Malformed(format!("{}: bad timestamp {:?}", field, value))),
    }
}

fn windowed(
    prefix: &str,
    m5: Option<String>,
    h1: Option<String>,
    h4: Option<String>,
    h24: Option<String>,
) -> Result<WindowedValues, ProviderError> {
    Ok(WindowedValues {
        m5: parse_optional_decimal(&format!("{}5M", prefix), m5.as_deref())?,
        h1: parse_optional_decimal(&format!("{}1H", prefix), h1.as_deref())?,
        h4: parse_optional_decimal(&format!("{}4H", prefix), h4.as_deref())?,
        h24: parse_optional_decimal(&format!("{}24H", prefix), h24.as_deref())?,
    })
}

fn convert_price_item(provider: &str, item: PriceInfoItem) -> Result<PriceQuote, ProviderError> {
    let price = parse_decimal("price", &item.price)?;
    if price < Decimal::ZERO {
        return Err(ProviderError::Malformed(format!(
            "negative price {} for {}",
            price, item.token_contract_address
        )));
    }

    let key = TokenKey::new(&item.chain_index.into_string(), &item.token_contract_address);

    Ok(PriceQuote {
        provider: provider.to_string(),
        chain_index: key.chain_index,
        token_address: key.address,
        price,
        price_change: windowed(
            "priceChange",
            item.price_change_5m,
            item.price_change_1h,
            item.price_change_4h,
            item.price_change_24h,
        )?,
        volume: windowed(
            "volume",
            item.volume_5m,
            item.volume_1h,
            item.volume_4h,
            item.volume_24h,
        )?,
        market_cap: parse_optional_decimal("marketCap", item.market_cap.as_deref())?,
        observed_at: parse_millis("time", item.time.as_deref())?,
    })
}

/// Best-effort native symbol; the chain endpoint does not report one.
fn native_symbol(chain_index: &str, chain_name: &str) -> String {
    let symbol = match chain_index {
        "1" | "10" | "324" | "8453" | "42161" | "59144" | "534352" => "ETH",
        "56" => "BNB",
        "137" => "POL",
        "43114" => "AVAX",
        "250" => "FTM",
        "196" | "66" => "OKB",
        "501" => "SOL",
        "784" => "SUI",
        "607" => "TON",
        "195" => "TRX",
        _ => return chain_name.to_uppercase(),
    };
    symbol.to_string()
}

// ============================================================================
// DexAggregatorFeed - on-chain aggregator over HTTP
// ============================================================================

pub struct DexAggregatorFeed {
    name: String,
    base_url: String,
    timeout: Duration,
    http: Arc<dyn HttpClient>,
}

impl DexAggregatorFeed {
    pub fn new(config: &ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        DexAggregatorFeed {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            http,
        }
    }
}

#[async_trait]
impl PriceSource for DexAggregatorFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_batch(&self, tokens: &[TokenKey]) -> Result<Vec<PriceQuote>, ProviderError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::Value::Array(
            tokens
                .iter()
                .map(|t| json!({ "chainIndex": t.chain_index, "tokenContractAddress": t.address }))
                .collect(),
        );

        let response = self
            .http
            .post_json(&self.base_url, PRICE_INFO_PATH, &body, self.timeout)
            .await?
            .into_success()?;

        let items: Vec<PriceInfoItem> = parse_envelope(&response.body)?;
        let quotes = items
            .into_iter()
            .map(|item| convert_price_item(&self.name, item))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "{}: {} prices for {} requested tokens",
            self.name,
            quotes.len(),
            tokens.len()
        );
        Ok(quotes)
    }
}

#[async_trait]
impl TokenCatalog for DexAggregatorFeed {
    async fn fetch_chains(&self) -> Result<Vec<ChainDescriptor>, ProviderError> {
        let response = self
            .http
            .get(&self.base_url, SUPPORTED_CHAINS_PATH, &[], self.timeout)
            .await?
            .into_success()?;

        let items: Vec<ChainItem> = parse_envelope(&response.body)?;
        items
            .into_iter()
            .map(|item| {
                let index = item
                    .chain_index
                    .or(item.chain_id)
                    .map(Scalar::into_string)
                    .ok_or_else(|| {
                        ProviderError::Malformed(format!("chain {} has no index", item.chain_name))
                    })?;
                let native = native_symbol(&index, &item.chain_name);
                Ok(ChainDescriptor::new(&index, &item.chain_name, &native))
            })
            .collect()
    }

    async fn fetch_tokens(&self, chain_index: &str) -> Result<Vec<TokenDescriptor>, ProviderError> {
        let query = vec![("chainIndex".to_string(), chain_index.to_string())];
        let response = self
            .http
            .get(&self.base_url, ALL_TOKENS_PATH, &query, self.timeout)
            .await?
            .into_success()?;

        let items: Vec<TokenItem> = parse_envelope(&response.body)?;
        items
            .into_iter()
            .map(|item| {
                let raw = item.decimals.into_string();
                let decimals = raw.trim().parse::<u8>().map_err(|_| {
                    ProviderError::Malformed(format!(
                        "decimals {:?} for {}",
                        raw, item.token_contract_address
                    ))
                })?;
                Ok(TokenDescriptor::new(
                    chain_index,
                    &item.token_contract_address,
                    &item.token_symbol,
                    decimals,
                ))
            })
            .collect()
    }
}

// ============================================================================
// MockPriceFeed - scripted in-memory market
// ============================================================================

/// In-memory market for testing and offline demo runs.
///
/// Failures can be scripted per token: batch calls (more than one token)
/// containing a token, or any call containing it, or simply the next N calls.
pub struct MockPriceFeed {
    name: String,
    latency: Duration,
    chain_latency: HashMap<String, Duration>,
    chains: Vec<ChainDescriptor>,
    tokens: HashMap<String, Vec<TokenDescriptor>>,
    prices: HashMap<TokenKey, Decimal>,
    batch_failures: HashMap<TokenKey, ProviderError>,
    token_failures: HashMap<TokenKey, ProviderError>,
    upcoming_failures: AtomicU32,
    upcoming_error: Option<ProviderError>,
    price_calls: Mutex<Vec<Vec<TokenKey>>>,
    token_list_calls: AtomicUsize,
    chain_list_calls: AtomicUsize,
}

impl MockPriceFeed {
    pub fn new(name: &str) -> Self {
        MockPriceFeed {
            name: name.to_string(),
            latency: Duration::ZERO,
            chain_latency: HashMap::new(),
            chains: Vec::new(),
            tokens: HashMap::new(),
            prices: HashMap::new(),
            batch_failures: HashMap::new(),
            token_failures: HashMap::new(),
            upcoming_failures: AtomicU32::new(0),
            upcoming_error: None,
            price_calls: Mutex::new(Vec::new()),
            token_list_calls: AtomicUsize::new(0),
            chain_list_calls: AtomicUsize::new(0),
        }
    }

    /// A small multi-chain market with plausible prices
    pub fn demo() -> Self {
        let eth = [
            ("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "ETH", 18, Decimal::new(341275, 2)),
            ("0x2260fac5e5542a773aa44fbcfedf7c193bc2c599", "BTC", 8, Decimal::new(6421050, 2)),
            ("0x514910771af9ca656af840dff83e8264ecf986ca", "LINK", 18, Decimal::new(1452, 2)),
            ("0x1f9840a85d5af5bf1d1762f925bdaddc4201f984", "UNI", 18, Decimal::new(1061, 2)),
            ("0x7fc66500c84a76ad7e9c93437bfc5ac33e2ddae9", "AAVE", 18, Decimal::new(15230, 2)),
            ("0x6982508145454ce325ddbe47a25d4ec3d2311933", "PEPE", 18, Decimal::new(1084, 8)),
        ];
        let sol = [
            ("So11111111111111111111111111111111111111112", "SOL", 9, Decimal::new(15000, 2)),
            ("JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN", "JUP", 6, Decimal::new(8712, 4)),
        ];
        let bsc = [
            ("0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c", "BNB", 18, Decimal::new(57815, 2)),
            ("0x0e09fabb73bd3ade0a17ecc321fd13a19e81ce82", "CAKE", 18, Decimal::new(2015, 3)),
        ];

        let mut feed = MockPriceFeed::new("mock-dex");
        for (chain, name, native, listed) in [
            ("1", "Ethereum", "ETH", &eth[..]),
            ("501", "Solana", "SOL", &sol[..]),
            ("56", "BNB Chain", "BNB", &bsc[..]),
        ] {
            let tokens: Vec<_> = listed
                .iter()
                .map(|(addr, symbol, decimals, _)| TokenDescriptor::new(chain, addr, symbol, *decimals))
                .collect();
            feed = feed.with_chain(ChainDescriptor::new(chain, name, native), tokens);
            for (addr, _, _, price) in listed {
                feed = feed.with_price(TokenKey::new(chain, addr), *price);
            }
        }
        feed
    }

    pub fn with_chain(mut self, chain: ChainDescriptor, tokens: Vec<TokenDescriptor>) -> Self {
        self.tokens.insert(chain.chain_index.clone(), tokens);
        self.chains.push(chain);
        self
    }

    pub fn with_price(mut self, key: TokenKey, price: Decimal) -> Self {
        self.prices.insert(key, price);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Extra latency for calls concerning one chain
    pub fn with_chain_latency(mut self, chain_index: &str, latency: Duration) -> Self {
        self.chain_latency.insert(chain_index.to_string(), latency);
        self
    }

    /// Calls with more than one token that include `key` fail with `err`
    pub fn fail_batches_containing(mut self, key: TokenKey, err: ProviderError) -> Self {
        self.batch_failures.insert(key, err);
        self
    }

    /// Every call that includes `key` fails with `err`
    pub fn fail_token(mut self, key: TokenKey, err: ProviderError) -> Self {
        self.token_failures.insert(key, err);
        self
    }

    /// The next `count` price calls fail with `err`, whatever they ask for
    pub fn fail_next_calls(mut self, count: u32, err: ProviderError) -> Self {
        self.upcoming_failures = AtomicU32::new(count);
        self.upcoming_error = Some(err);
        self
    }

    /// Token lists of every price call made so far, in call order
    pub fn price_calls(&self) -> Vec<Vec<TokenKey>> {
        self.price_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn token_list_calls(&self) -> usize {
        self.token_list_calls.load(Ordering::SeqCst)
    }

    pub fn chain_list_calls(&self) -> usize {
        self.chain_list_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self, chain_index: Option<&str>) {
        let extra = chain_index
            .and_then(|c| self.chain_latency.get(c))
            .copied()
            .unwrap_or(Duration::ZERO);
        let total = self.latency + extra;
        if !total.is_zero() {
            tokio::time::sleep(total).await;
        }
    }

    fn take_upcoming_failure(&self) -> Option<ProviderError> {
        let claimed = self
            .upcoming_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if claimed {
            self.upcoming_error.clone()
        } else {
            None
        }
    }
}

#[async_trait]
impl PriceSource for MockPriceFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_batch(&self, tokens: &[TokenKey]) -> Result<Vec<PriceQuote>, ProviderError> {
        if let Ok(mut calls) = self.price_calls.lock() {
            calls.push(tokens.to_vec());
        }
        self.simulate_latency(tokens.first().map(|t| t.chain_index.as_str()))
            .await;

        if let Some(err) = self.take_upcoming_failure() {
            return Err(err);
        }
        if let Some(err) = tokens.iter().find_map(|t| self.token_failures.get(t)) {
            return Err(err.clone());
        }
        if tokens.len() > 1 {
            if let Some(err) = tokens.iter().find_map(|t| self.batch_failures.get(t)) {
                return Err(err.clone());
            }
        }

        Ok(tokens
            .iter()
            .filter_map(|t| {
                self.prices
                    .get(t)
                    .map(|price| PriceQuote::new(&self.name, t, *price))
            })
            .collect())
    }
}

#[async_trait]
impl TokenCatalog for MockPriceFeed {
    async fn fetch_chains(&self) -> Result<Vec<ChainDescriptor>, ProviderError> {
        self.chain_list_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(None).await;
        Ok(self.chains.clone())
    }

    async fn fetch_tokens(&self, chain_index: &str) -> Result<Vec<TokenDescriptor>, ProviderError> {
        self.token_list_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(Some(chain_index)).await;
        Ok(self.tokens.get(chain_index).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use rust_decimal_macros::dec;

    /// Replays one canned response and remembers the last request
    struct CannedHttp {
        response: Result<HttpResponse, ProviderError>,
        last_request: Mutex<Option<(String, String)>>,
    }

    impl CannedHttp {
        fn new(response: Result<HttpResponse, ProviderError>) -> Arc<Self> {
            Arc::new(CannedHttp {
                response,
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl HttpClient for CannedHttp {
        async fn get(
            &self,
            _base_url: &str,
            path: &str,
            query: &[(String, String)],
            _deadline: Duration,
        ) -> Result<HttpResponse, ProviderError> {
            *self.last_request.lock().unwrap() = Some((path.to_string(), format!("{:?}", query)));
            self.response.clone()
        }

        async fn post_json(
            &self,
            _base_url: &str,
            path: &str,
            body: &serde_json::Value,
            _deadline: Duration,
        ) -> Result<HttpResponse, ProviderError> {
            *self.last_request.lock().unwrap() = Some((path.to_string(), body.to_string()));
            self.response.clone()
        }
    }

    fn feed(http: Arc<CannedHttp>) -> DexAggregatorFeed {
        let config = crate::config::EngineConfig::default();
        DexAggregatorFeed::new(&config.dex, http)
    }

    const PRICE_BODY: &str = r#"{
        "code": "0",
        "msg": "",
        "data": [{
            "chainIndex": "1",
            "tokenContractAddress": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "price": "3412.75",
            "priceChange5M": "0.1",
            "priceChange1H": "-0.35",
            "priceChange4H": "",
            "priceChange24H": "2.4",
            "volume5M": "120000",
            "volume1H": "1500000",
            "volume4H": "6100000",
            "volume24H": "38000000",
            "marketCap": "410000000000",
            "time": "1718000000000"
        }]
    }"#;

    #[tokio::test]
    async fn test_parses_price_batch() {
        let http = CannedHttp::new(Ok(HttpResponse::ok(PRICE_BODY)));
        let feed = feed(http.clone());
        let weth = TokenKey::new("1", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

        let quotes = feed.fetch_batch(&[weth.clone()]).await.unwrap();

        assert_eq!(quotes.len(), 1);
        let quote = &quotes[0];
        assert_eq!(quote.key(), weth);
        assert_eq!(quote.price, dec!(3412.75));
        assert_eq!(quote.price_change.h1, Some(dec!(-0.35)));
        assert_eq!(quote.price_change.h4, None);
        assert_eq!(quote.volume.h24, Some(dec!(38000000)));
        assert_eq!(quote.observed_at.timestamp_millis(), 1_718_000_000_000);

        let (path, body) = http.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(path, PRICE_INFO_PATH);
        assert!(body.contains("\"tokenContractAddress\":\"0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2\""));
    }

    #[tokio::test]
    async fn test_non_zero_code_is_api_error() {
        let body = r#"{"code":"50011","msg":"Too Many Requests","data":[]}"#;
        let feed = feed(CannedHttp::new(Ok(HttpResponse::ok(body))));

        let err = feed.fetch_batch(&[TokenKey::new("1", "0xabc")]).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Api {
                code: "50011".to_string(),
                msg: "Too Many Requests".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejects_unexpected_shapes() {
        for body in [
            r#"{"code":"0","msg":"","data":[{"chainIndex":"1","tokenContractAddress":"0xabc","price":"abc"}]}"#,
            r#"{"code":"0","msg":"","data":[{"chainIndex":"1","tokenContractAddress":"0xabc","price":"-1"}]}"#,
            r#"{"code":"0","msg":"","data":[{"chainIndex":"1","price":"1"}]}"#,
            r#"{"code":"0","msg":""}"#,
            r#"<html>bad gateway</html>"#,
        ] {
            let feed = feed(CannedHttp::new(Ok(HttpResponse::ok(body))));
            let err = feed.fetch_batch(&[TokenKey::new("1", "0xabc")]).await.unwrap_err();
            assert!(matches!(err, ProviderError::Malformed(_)), "{}: {:?}", body, err);
        }
    }

    #[tokio::test]
    async fn test_http_status_is_classified() {
        let response = HttpResponse {
            status: 502,
            body: String::new(),
        };
        let feed = feed(CannedHttp::new(Ok(response)));

        let err = feed.fetch_batch(&[TokenKey::new("1", "0xabc")]).await.unwrap_err();
        assert_eq!(err, ProviderError::Server { status: 502 });
    }

    #[tokio::test]
    async fn test_parses_chains_and_tokens() {
        let chains = r#"{"code":"0","msg":"","data":[
            {"chainId":"1","chainIndex":"1","chainName":"Ethereum","dexTokenApproveAddress":"0x40aa"},
            {"chainIndex":501,"chainName":"Solana"}
        ]}"#;
        let feed_chains = feed(CannedHttp::new(Ok(HttpResponse::ok(chains))));
        let parsed = feed_chains.fetch_chains().await.unwrap();
        assert_eq!(
            parsed,
            vec![
                ChainDescriptor::new("1", "Ethereum", "ETH"),
                ChainDescriptor::new("501", "Solana", "SOL"),
            ]
        );

        let tokens = r#"{"code":"0","msg":"","data":[
            {"decimals":"18","tokenContractAddress":"0xA0b8","tokenLogoUrl":"x","tokenName":"Coin","tokenSymbol":"CN"},
            {"decimals":6,"tokenContractAddress":"0xdAC1","tokenSymbol":"USDT"}
        ]}"#;
        let http = CannedHttp::new(Ok(HttpResponse::ok(tokens)));
        let parsed = feed(http.clone()).fetch_tokens("1").await.unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], TokenDescriptor::new("1", "0xa0b8", "CN", 18));
        assert_eq!(parsed[1].decimals, 6);

        let (path, query) = http.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(path, ALL_TOKENS_PATH);
        assert!(query.contains("chainIndex"));
    }

    #[tokio::test]
    async fn test_mock_scripted_failures() {
        let a = TokenKey::new("1", "0xaa");
        let b = TokenKey::new("1", "0xbb");
        let feed = MockPriceFeed::new("mock")
            .with_price(a.clone(), dec!(1))
            .with_price(b.clone(), dec!(2))
            .fail_batches_containing(b.clone(), ProviderError::Server { status: 500 });

        assert!(feed.fetch_batch(&[a.clone(), b.clone()]).await.is_err());
        assert_eq!(feed.fetch_batch(&[b.clone()]).await.unwrap()[0].price, dec!(2));
        assert_eq!(feed.price_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_demo_market_is_consistent() {
        let feed = MockPriceFeed::demo();
        let chains = feed.fetch_chains().await.unwrap();
        assert_eq!(chains.len(), 3);

        for chain in chains {
            let tokens = feed.fetch_tokens(&chain.chain_index).await.unwrap();
            assert!(!tokens.is_empty());
            let keys: Vec<_> = tokens.iter().map(|t| t.key()).collect();
            let quotes = feed.fetch_batch(&keys).await.unwrap();
            assert_eq!(quotes.len(), keys.len());
        }
    }
}
