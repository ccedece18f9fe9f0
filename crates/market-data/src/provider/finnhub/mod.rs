//! Finnhub provider implementation.
//!
//! Endpoints used:
//! - `/stock/candle` with daily and 5 minute resolution
//! - `/stock/dividend` and `/stock/split` for corporate actions
//! - `/stock/symbol?exchange=US` for discovery
//!
//! Finnhub free tier is limited to 60 API calls per minute.
//! API documentation: https://finnhub.io/docs/api

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{FetchError, TransportKind};
use crate::models::{
    AssetKind, DataType, DiscoveredSymbol, DividendEvent, FetchRequest, IntradayBar, PriceBar,
    ProviderId, Record, SplitEvent,
};
use crate::provider::{DiscoverySource, ProviderCapabilities, ProviderClient, RateLimit};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER_ID: &str = "FINNHUB";

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /stock/candle endpoint
#[derive(Debug, Deserialize)]
struct CandleResponse {
    /// Status: "ok" or "no_data"
    s: String,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
    /// Timestamps (Unix)
    #[serde(default)]
    t: Vec<i64>,
}

/// Item of the /stock/dividend response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DividendItem {
    /// Ex-dividend date
    date: String,
    amount: f64,
    pay_date: Option<String>,
    record_date: Option<String>,
    declaration_date: Option<String>,
}

/// Item of the /stock/split response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitItem {
    date: String,
    from_factor: f64,
    to_factor: f64,
}

/// Item of the /stock/symbol response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolItem {
    description: String,
    symbol: String,
    #[serde(default)]
    mic: Option<String>,
    /// Security type (e.g., "Common Stock", "ETP")
    #[serde(rename = "type", default)]
    security_type: String,
}

/// Error response from Finnhub
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

// ============================================================================
// FinnhubProvider
// ============================================================================

/// Finnhub provider.
///
/// Covers US equities and ETFs; no holdings endpoint on the free tier.
pub struct FinnhubProvider {
    client: Client,
    api_key: String,
}

impl FinnhubProvider {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    /// Make a GET request to the Finnhub API.
    async fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, FetchError> {
        let url = format!("{}{}", BASE_URL, endpoint);

        let request = self
            .client
            .get(&url)
            .header("X-Finnhub-Token", &self.api_key)
            .query(params);

        debug!("Finnhub request: {} with {} params", endpoint, params.len());

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(PROVIDER_ID, e))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::rate_limited(PROVIDER_ID));
        }

        // 401: bad key, 403: endpoint not included in the plan
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(FetchError::transport(
                PROVIDER_ID,
                TransportKind::Unauthorized,
                format!("HTTP {}", status),
            ));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or_else(|| format!("HTTP {} - {}", status, body));
            return Err(FetchError::transport(
                PROVIDER_ID,
                TransportKind::Server,
                message,
            ));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(PROVIDER_ID, e))
    }

    fn parse_date(date_str: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d").ok()
    }

    fn parse_optional_date(value: &Option<String>) -> Option<NaiveDate> {
        value.as_deref().and_then(Self::parse_date)
    }

    /// Validate a candle payload and zip its columns into (timestamp, o, h, l, c, v) rows.
    #[allow(clippy::type_complexity)]
    fn candle_rows(
        symbol: &str,
        response: CandleResponse,
    ) -> Result<
        Vec<(
            DateTime<Utc>,
            Option<Decimal>,
            Option<Decimal>,
            Option<Decimal>,
            Decimal,
            Option<Decimal>,
        )>,
        FetchError,
    > {
        if response.s == "no_data" {
            return Err(FetchError::empty(PROVIDER_ID, symbol));
        }

        if response.s != "ok" {
            return Err(FetchError::transport(
                PROVIDER_ID,
                TransportKind::Provider,
                format!("Unexpected candle status: {}", response.s),
            ));
        }

        let len = response.t.len();
        if response.c.len() != len
            || response.o.len() != len
            || response.h.len() != len
            || response.l.len() != len
        {
            return Err(FetchError::transport(
                PROVIDER_ID,
                TransportKind::Decode,
                "Mismatched array lengths in candle response",
            ));
        }

        let mut rows = Vec::with_capacity(len);
        for i in 0..len {
            let Some(timestamp) = Utc.timestamp_opt(response.t[i], 0).single() else {
                warn!("Invalid timestamp at index {}: {}", i, response.t[i]);
                continue;
            };
            let Ok(close) = Decimal::try_from(response.c[i]) else {
                warn!("Invalid close price at index {}: {}", i, response.c[i]);
                continue;
            };
            rows.push((
                timestamp,
                Decimal::try_from(response.o[i]).ok(),
                Decimal::try_from(response.h[i]).ok(),
                Decimal::try_from(response.l[i]).ok(),
                close,
                response.v.get(i).and_then(|&v| Decimal::try_from(v).ok()),
            ));
        }

        if rows.is_empty() {
            return Err(FetchError::empty(PROVIDER_ID, symbol));
        }
        Ok(rows)
    }

    fn price_records(symbol: &str, response: CandleResponse) -> Result<Vec<Record>, FetchError> {
        let mut bars: Vec<PriceBar> = Self::candle_rows(symbol, response)?
            .into_iter()
            .map(|(timestamp, open, high, low, close, volume)| PriceBar {
                symbol: symbol.to_string(),
                date: timestamp.date_naive(),
                open,
                high,
                low,
                close,
                adjusted_close: None,
                volume,
            })
            .collect();
        bars.sort_by_key(|bar| bar.date);
        bars.dedup_by_key(|bar| bar.date);
        Ok(bars.into_iter().map(Record::Price).collect())
    }

    fn intraday_records(symbol: &str, response: CandleResponse) -> Result<Vec<Record>, FetchError> {
        let mut bars: Vec<IntradayBar> = Self::candle_rows(symbol, response)?
            .into_iter()
            .map(|(timestamp, open, high, low, close, volume)| IntradayBar {
                symbol: symbol.to_string(),
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            })
            .collect();
        bars.sort_by_key(|bar| bar.timestamp);
        Ok(bars.into_iter().map(Record::Intraday).collect())
    }

    fn dividend_records(symbol: &str, items: Vec<DividendItem>) -> Result<Vec<Record>, FetchError> {
        let mut events: Vec<DividendEvent> = items
            .into_iter()
            .filter_map(|item| {
                Some(DividendEvent {
                    symbol: symbol.to_string(),
                    ex_date: Self::parse_date(&item.date)?,
                    amount: Decimal::try_from(item.amount).ok()?,
                    pay_date: Self::parse_optional_date(&item.pay_date),
                    record_date: Self::parse_optional_date(&item.record_date),
                    declaration_date: Self::parse_optional_date(&item.declaration_date),
                })
            })
            .collect();
        if events.is_empty() {
            return Err(FetchError::empty(PROVIDER_ID, symbol));
        }
        events.sort_by_key(|event| event.ex_date);
        Ok(events.into_iter().map(Record::Dividend).collect())
    }

    fn split_records(symbol: &str, items: Vec<SplitItem>) -> Result<Vec<Record>, FetchError> {
        let mut events: Vec<SplitEvent> = items
            .into_iter()
            .filter_map(|item| {
                Some(SplitEvent {
                    symbol: symbol.to_string(),
                    date: Self::parse_date(&item.date)?,
                    numerator: Decimal::try_from(item.to_factor).ok()?,
                    denominator: Decimal::try_from(item.from_factor).ok()?,
                })
            })
            .collect();
        if events.is_empty() {
            return Err(FetchError::empty(PROVIDER_ID, symbol));
        }
        events.sort_by_key(|event| event.date);
        Ok(events.into_iter().map(Record::Split).collect())
    }

    fn discovered(items: Vec<SymbolItem>) -> Vec<DiscoveredSymbol> {
        items
            .into_iter()
            .filter(|item| !item.symbol.is_empty())
            .map(|item| DiscoveredSymbol {
                asset_kind: AssetKind::classify(&item.security_type, &item.description),
                symbol: item.symbol,
                name: Some(item.description).filter(|d| !d.is_empty()),
                exchange: item.mic,
                source: ProviderId::Borrowed(PROVIDER_ID),
            })
            .collect()
    }

    async fn fetch_candles(
        &self,
        request: &FetchRequest,
        resolution: &str,
    ) -> Result<CandleResponse, FetchError> {
        let now = Utc::now();
        let from_ts = request.effective_start(now).timestamp().to_string();
        let to_ts = now.timestamp().to_string();
        let params = [
            ("symbol", request.symbol.as_str()),
            ("resolution", resolution),
            ("from", from_ts.as_str()),
            ("to", to_ts.as_str()),
        ];

        let text = self.get("/stock/candle", &params).await?;
        serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))
    }

    async fn fetch_ranged<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        request: &FetchRequest,
    ) -> Result<Vec<T>, FetchError> {
        let now = Utc::now();
        let from = request.effective_start(now).format("%Y-%m-%d").to_string();
        let to = now.format("%Y-%m-%d").to_string();
        let params = [
            ("symbol", request.symbol.as_str()),
            ("from", from.as_str()),
            ("to", to.as_str()),
        ];

        let text = self.get(endpoint, &params).await?;
        serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))
    }
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait]
impl ProviderClient for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        2
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            data_types: &[
                DataType::Price,
                DataType::Dividend,
                DataType::Split,
                DataType::Intraday,
            ],
            supports_discovery: true,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_minute: 60,
            initial_concurrency: 4,
            max_concurrency: 8,
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let symbol = request.symbol.as_str();
        let records = match request.data_type {
            DataType::Price => Self::price_records(symbol, self.fetch_candles(request, "D").await?),
            DataType::Intraday => {
                Self::intraday_records(symbol, self.fetch_candles(request, "5").await?)
            }
            DataType::Dividend => {
                Self::dividend_records(symbol, self.fetch_ranged("/stock/dividend", request).await?)
            }
            DataType::Split => {
                Self::split_records(symbol, self.fetch_ranged("/stock/split", request).await?)
            }
            DataType::Holdings => Err(FetchError::transport(
                PROVIDER_ID,
                TransportKind::Provider,
                "Holdings are not available from Finnhub",
            )),
        }?;

        debug!(
            provider = PROVIDER_ID,
            symbol,
            data_type = %request.data_type,
            count = records.len(),
            "Finnhub fetch complete"
        );
        Ok(records)
    }
}

#[async_trait]
impl DiscoverySource for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn discover(&self) -> Result<Vec<DiscoveredSymbol>, FetchError> {
        let text = self.get("/stock/symbol", &[("exchange", "US")]).await?;
        let items: Vec<SymbolItem> =
            serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))?;
        let symbols = Self::discovered(items);
        debug!("Finnhub: listed {} US symbols", symbols.len());
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_provider_id() {
        let provider = FinnhubProvider::new("test_key".to_string());
        assert_eq!(ProviderClient::id(&provider), "FINNHUB");
        assert_eq!(DiscoverySource::id(&provider), "FINNHUB");
    }

    #[test]
    fn test_provider_capabilities() {
        let provider = FinnhubProvider::new("test_key".to_string());
        let caps = provider.capabilities();
        assert!(caps.supports(DataType::Price));
        assert!(caps.supports(DataType::Dividend));
        assert!(!caps.supports(DataType::Holdings));
    }

    #[test]
    fn test_rate_limit() {
        let provider = FinnhubProvider::new("test_key".to_string());
        let limit = provider.rate_limit();
        assert_eq!(limit.requests_per_minute, 60);
        assert_eq!(limit.initial_concurrency, 4);
        assert_eq!(limit.max_concurrency, 8);
    }

    #[test]
    fn test_candle_response_to_price_bars() {
        let json = r#"{
            "s": "ok",
            "c": [150.0, 151.0, 152.0],
            "h": [151.0, 152.0, 153.0],
            "l": [149.0, 150.0, 151.0],
            "o": [149.5, 150.5, 151.5],
            "v": [1000000, 1100000, 1200000],
            "t": [1704240000, 1704153600, 1704067200]
        }"#;

        let response: CandleResponse = serde_json::from_str(json).unwrap();
        let records = FinnhubProvider::price_records("AAPL", response).unwrap();
        assert_eq!(records.len(), 3);
        match &records[0] {
            Record::Price(bar) => {
                assert_eq!(bar.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
                assert_eq!(bar.close, dec!(152));
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_candle_no_data_is_empty() {
        let response: CandleResponse = serde_json::from_str(r#"{"s": "no_data"}"#).unwrap();
        let err = FinnhubProvider::price_records("ZZZZ", response).unwrap_err();
        assert!(err.is_empty());
    }

    #[test]
    fn test_candle_length_mismatch_is_transport_error() {
        let json = r#"{"s": "ok", "c": [1.0], "h": [], "l": [], "o": [], "t": [1704067200]}"#;
        let response: CandleResponse = serde_json::from_str(json).unwrap();
        let err = FinnhubProvider::price_records("AAPL", response).unwrap_err();
        assert!(matches!(
            err,
            FetchError::Transport {
                kind: TransportKind::Decode,
                ..
            }
        ));
    }

    #[test]
    fn test_dividend_items() {
        let json = r#"[
            {"symbol": "AAPL", "date": "2019-11-07", "amount": 0.77, "adjustedAmount": 0.77,
             "payDate": "2019-11-14", "recordDate": "2019-11-11", "declarationDate": "2019-10-30", "currency": "USD"}
        ]"#;
        let items: Vec<DividendItem> = serde_json::from_str(json).unwrap();
        let records = FinnhubProvider::dividend_records("AAPL", items).unwrap();
        match &records[0] {
            Record::Dividend(event) => {
                assert_eq!(event.ex_date, NaiveDate::from_ymd_opt(2019, 11, 7).unwrap());
                assert_eq!(event.amount, dec!(0.77));
                assert_eq!(
                    event.pay_date,
                    Some(NaiveDate::from_ymd_opt(2019, 11, 14).unwrap())
                );
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_empty_dividend_list_is_empty() {
        let err = FinnhubProvider::dividend_records("TSLA", Vec::new()).unwrap_err();
        assert!(err.is_empty());
    }

    #[test]
    fn test_split_items() {
        let json = r#"[{"symbol": "AAPL", "date": "2020-08-31", "fromFactor": 1, "toFactor": 4}]"#;
        let items: Vec<SplitItem> = serde_json::from_str(json).unwrap();
        let records = FinnhubProvider::split_records("AAPL", items).unwrap();
        match &records[0] {
            Record::Split(event) => {
                assert_eq!(event.numerator, dec!(4));
                assert_eq!(event.denominator, dec!(1));
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_discovered_symbols() {
        let json = r#"[
            {"currency": "USD", "description": "APPLE INC", "displaySymbol": "AAPL", "figi": "BBG000B9XRY4", "mic": "XNAS", "symbol": "AAPL", "type": "Common Stock"},
            {"currency": "USD", "description": "SPDR GOLD TRUST", "displaySymbol": "GLD", "mic": "ARCX", "symbol": "GLD", "type": "ETP"},
            {"currency": "USD", "description": "", "displaySymbol": "", "symbol": "", "type": ""}
        ]"#;
        let items: Vec<SymbolItem> = serde_json::from_str(json).unwrap();
        let symbols = FinnhubProvider::discovered(items);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].asset_kind, AssetKind::Equity);
        assert_eq!(symbols[0].exchange.as_deref(), Some("XNAS"));
        assert_eq!(symbols[1].asset_kind, AssetKind::Etf);
    }
}
