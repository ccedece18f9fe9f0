//! Alpha Vantage provider implementation.
//!
//! Endpoints used:
//! - `TIME_SERIES_DAILY` for daily prices
//! - `TIME_SERIES_INTRADAY` (5min) for intraday bars
//! - `DIVIDENDS` and `SPLITS` for corporate actions
//! - `ETF_PROFILE` for ETF holdings
//! - `LISTING_STATUS` (CSV) for discovery
//!
//! Note: Alpha Vantage free tier is limited to 5 API calls per minute.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::{FetchError, TransportKind};
use crate::models::{
    AssetKind, DataType, DiscoveredSymbol, DividendEvent, FetchRequest, HoldingEntry,
    IntradayBar, PriceBar, ProviderId, Record, SplitEvent,
};
use crate::provider::{DiscoverySource, ProviderCapabilities, ProviderClient, RateLimit};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER_ID: &str = "ALPHA_VANTAGE";

/// Windows shorter than this are served by `outputsize=compact`.
const COMPACT_WINDOW_DAYS: i64 = 100;

/// Alpha Vantage provider.
///
/// Free tier is limited to 5 API calls per minute.
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
}

// ============================================================================
// Response structures for Alpha Vantage API
// ============================================================================

/// Status fields Alpha Vantage attaches to any JSON payload.
#[derive(Debug, Default, Deserialize)]
struct ApiNotice {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<HashMap<String, OhlcvEntry>>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct IntradayResponse {
    #[serde(rename = "Time Series (5min)")]
    time_series: Option<HashMap<String, OhlcvEntry>>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct OhlcvEntry {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

#[derive(Debug, Deserialize)]
struct DividendsResponse {
    #[serde(default)]
    data: Vec<DividendRow>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct DividendRow {
    ex_dividend_date: String,
    declaration_date: Option<String>,
    record_date: Option<String>,
    payment_date: Option<String>,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct SplitsResponse {
    #[serde(default)]
    data: Vec<SplitRow>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct SplitRow {
    effective_date: String,
    split_factor: String,
}

#[derive(Debug, Deserialize)]
struct EtfProfileResponse {
    #[serde(default)]
    holdings: Vec<EtfHoldingRow>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct EtfHoldingRow {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    weight: Option<String>,
}

/// One row of the LISTING_STATUS CSV.
#[derive(Debug, Deserialize)]
struct ListingRow {
    symbol: String,
    name: String,
    exchange: String,
    #[serde(rename = "assetType")]
    asset_type: String,
    status: String,
}

// ============================================================================
// AlphaVantageProvider
// ============================================================================

impl AlphaVantageProvider {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    /// Make a request to the Alpha Vantage API.
    async fn get(&self, params: &[(&str, &str)]) -> Result<String, FetchError> {
        let mut all_params: Vec<(&str, &str)> = params.to_vec();
        all_params.push(("apikey", &self.api_key));

        let url = reqwest::Url::parse_with_params(BASE_URL, &all_params).map_err(|e| {
            FetchError::transport(
                PROVIDER_ID,
                TransportKind::Network,
                format!("Failed to build URL: {}", e),
            )
        })?;

        debug!(
            "Alpha Vantage request: {}",
            url.as_str().replace(&self.api_key, "***")
        );

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(PROVIDER_ID, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::rate_limited(PROVIDER_ID));
        }

        if !status.is_success() {
            return Err(FetchError::transport(
                PROVIDER_ID,
                TransportKind::Server,
                format!("HTTP {}", status),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(PROVIDER_ID, e))
    }

    /// Check for API-level errors in the response.
    fn check_notice(notice: &ApiNotice, symbol: &str) -> Result<(), FetchError> {
        if let Some(ref msg) = notice.error_message {
            // Unknown tickers come back as "Invalid API call"
            if msg.contains("Invalid API call") || msg.contains("not found") {
                return Err(FetchError::empty(PROVIDER_ID, symbol));
            }
            return Err(FetchError::transport(
                PROVIDER_ID,
                TransportKind::Provider,
                msg.clone(),
            ));
        }

        for msg in [&notice.note, &notice.information].into_iter().flatten() {
            if msg.contains("API call frequency") || msg.contains("rate limit") {
                return Err(FetchError::rate_limited(PROVIDER_ID));
            }
            if msg.contains("premium") {
                return Err(FetchError::transport(
                    PROVIDER_ID,
                    TransportKind::Unauthorized,
                    msg.clone(),
                ));
            }
            warn!("Alpha Vantage notice: {}", msg);
        }

        Ok(())
    }

    fn parse_date(date_str: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d").ok()
    }

    /// Alpha Vantage writes missing dates as the string "None".
    fn parse_optional_date(value: &Option<String>) -> Option<NaiveDate> {
        value.as_deref().and_then(Self::parse_date)
    }

    fn parse_decimal(s: &str) -> Option<Decimal> {
        Decimal::from_str(s.trim()).ok()
    }

    /// Parse weight string (handles both "8.9%" and "0.089" formats)
    fn parse_weight(s: &str) -> Option<Decimal> {
        let trimmed = s.trim();
        if let Some(pct) = trimmed.strip_suffix('%') {
            Self::parse_decimal(pct).map(|v| v / Decimal::ONE_HUNDRED)
        } else {
            Self::parse_decimal(trimmed)
        }
    }

    /// Intraday timestamps are US/Eastern wall clock times.
    fn parse_eastern_timestamp(s: &str) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()?;
        New_York
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn non_empty(symbol: &str, records: Vec<Record>) -> Result<Vec<Record>, FetchError> {
        if records.is_empty() {
            Err(FetchError::empty(PROVIDER_ID, symbol))
        } else {
            Ok(records)
        }
    }

    fn price_records(
        symbol: &str,
        response: DailyResponse,
        start: NaiveDate,
    ) -> Result<Vec<Record>, FetchError> {
        Self::check_notice(&response.notice, symbol)?;

        let Some(time_series) = response.time_series else {
            return Err(FetchError::empty(PROVIDER_ID, symbol));
        };

        let mut bars: Vec<PriceBar> = time_series
            .into_iter()
            .filter_map(|(date_str, entry)| {
                let date = Self::parse_date(&date_str)?;
                if date < start {
                    return None;
                }
                Some(PriceBar {
                    symbol: symbol.to_string(),
                    date,
                    open: Self::parse_decimal(&entry.open),
                    high: Self::parse_decimal(&entry.high),
                    low: Self::parse_decimal(&entry.low),
                    close: Self::parse_decimal(&entry.close)?,
                    adjusted_close: None,
                    volume: Self::parse_decimal(&entry.volume),
                })
            })
            .collect();
        bars.sort_by_key(|bar| bar.date);

        Self::non_empty(symbol, bars.into_iter().map(Record::Price).collect())
    }

    fn intraday_records(
        symbol: &str,
        response: IntradayResponse,
        start: DateTime<Utc>,
    ) -> Result<Vec<Record>, FetchError> {
        Self::check_notice(&response.notice, symbol)?;

        let Some(time_series) = response.time_series else {
            return Err(FetchError::empty(PROVIDER_ID, symbol));
        };

        let mut bars: Vec<IntradayBar> = time_series
            .into_iter()
            .filter_map(|(ts, entry)| {
                let timestamp = Self::parse_eastern_timestamp(&ts)?;
                if timestamp < start {
                    return None;
                }
                Some(IntradayBar {
                    symbol: symbol.to_string(),
                    timestamp,
                    open: Self::parse_decimal(&entry.open),
                    high: Self::parse_decimal(&entry.high),
                    low: Self::parse_decimal(&entry.low),
                    close: Self::parse_decimal(&entry.close)?,
                    volume: Self::parse_decimal(&entry.volume),
                })
            })
            .collect();
        bars.sort_by_key(|bar| bar.timestamp);

        Self::non_empty(symbol, bars.into_iter().map(Record::Intraday).collect())
    }

    fn dividend_records(
        symbol: &str,
        response: DividendsResponse,
        start: NaiveDate,
    ) -> Result<Vec<Record>, FetchError> {
        Self::check_notice(&response.notice, symbol)?;

        let mut events: Vec<DividendEvent> = response
            .data
            .into_iter()
            .filter_map(|row| {
                let ex_date = Self::parse_date(&row.ex_dividend_date)?;
                if ex_date < start {
                    return None;
                }
                Some(DividendEvent {
                    symbol: symbol.to_string(),
                    ex_date,
                    amount: Self::parse_decimal(&row.amount)?,
                    pay_date: Self::parse_optional_date(&row.payment_date),
                    record_date: Self::parse_optional_date(&row.record_date),
                    declaration_date: Self::parse_optional_date(&row.declaration_date),
                })
            })
            .collect();
        events.sort_by_key(|event| event.ex_date);

        Self::non_empty(symbol, events.into_iter().map(Record::Dividend).collect())
    }

    fn split_records(
        symbol: &str,
        response: SplitsResponse,
        start: NaiveDate,
    ) -> Result<Vec<Record>, FetchError> {
        Self::check_notice(&response.notice, symbol)?;

        let mut events: Vec<SplitEvent> = response
            .data
            .into_iter()
            .filter_map(|row| {
                let date = Self::parse_date(&row.effective_date)?;
                if date < start {
                    return None;
                }
                Some(SplitEvent {
                    symbol: symbol.to_string(),
                    date,
                    numerator: Self::parse_decimal(&row.split_factor)?,
                    denominator: Decimal::ONE,
                })
            })
            .collect();
        events.sort_by_key(|event| event.date);

        Self::non_empty(symbol, events.into_iter().map(Record::Split).collect())
    }

    /// ETF_PROFILE returns the current snapshot, stamped with `as_of`.
    fn holding_records(
        symbol: &str,
        response: EtfProfileResponse,
        as_of: NaiveDate,
    ) -> Result<Vec<Record>, FetchError> {
        Self::check_notice(&response.notice, symbol)?;

        let records = response
            .holdings
            .into_iter()
            .filter_map(|row| {
                let holding_symbol = row.symbol.filter(|s| !s.is_empty() && s != "n/a")?;
                Some(Record::Holding(HoldingEntry {
                    etf_symbol: symbol.to_string(),
                    as_of,
                    holding_symbol,
                    name: row.description,
                    weight: row.weight.as_deref().and_then(Self::parse_weight),
                }))
            })
            .collect();

        Self::non_empty(symbol, records)
    }

    fn parse_listing(text: &str) -> Result<Vec<DiscoveredSymbol>, FetchError> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let mut symbols = Vec::new();
        for row in reader.deserialize::<ListingRow>() {
            let row = row.map_err(|e| FetchError::decode(PROVIDER_ID, e))?;
            if !row.status.eq_ignore_ascii_case("active") {
                continue;
            }
            symbols.push(DiscoveredSymbol {
                asset_kind: AssetKind::classify(&row.asset_type, &row.name),
                symbol: row.symbol,
                name: Some(row.name),
                exchange: Some(row.exchange),
                source: ProviderId::Borrowed(PROVIDER_ID),
            });
        }
        Ok(symbols)
    }

    /// Unadjusted daily series; the adjusted one is a premium endpoint.
    fn daily_params<'a>(symbol: &'a str, output_size: &'a str) -> [(&'static str, &'a str); 3] {
        [
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", symbol),
            ("outputsize", output_size),
        ]
    }

    async fn fetch_prices(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let now = Utc::now();
        let start = request.effective_start(now);
        let output_size = if (now - start).num_days() <= COMPACT_WINDOW_DAYS {
            "compact"
        } else {
            "full"
        };
        let params = Self::daily_params(&request.symbol, output_size);

        let text = self.get(&params).await?;
        let response: DailyResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))?;
        Self::price_records(&request.symbol, response, start.date_naive())
    }

    async fn fetch_intraday(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let params = [
            ("function", "TIME_SERIES_INTRADAY"),
            ("symbol", request.symbol.as_str()),
            ("interval", "5min"),
            ("outputsize", "full"),
        ];

        let text = self.get(&params).await?;
        let response: IntradayResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))?;
        Self::intraday_records(&request.symbol, response, request.effective_start(Utc::now()))
    }

    async fn fetch_dividends(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let params = [("function", "DIVIDENDS"), ("symbol", request.symbol.as_str())];

        let text = self.get(&params).await?;
        let response: DividendsResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))?;
        Self::dividend_records(
            &request.symbol,
            response,
            request.effective_start(Utc::now()).date_naive(),
        )
    }

    async fn fetch_splits(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let params = [("function", "SPLITS"), ("symbol", request.symbol.as_str())];

        let text = self.get(&params).await?;
        let response: SplitsResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))?;
        Self::split_records(
            &request.symbol,
            response,
            request.effective_start(Utc::now()).date_naive(),
        )
    }

    async fn fetch_holdings(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let params = [("function", "ETF_PROFILE"), ("symbol", request.symbol.as_str())];

        let text = self.get(&params).await?;
        let response: EtfProfileResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))?;
        Self::holding_records(&request.symbol, response, Utc::now().date_naive())
    }
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait]
impl ProviderClient for AlphaVantageProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        // Behind Finnhub due to the tighter free-tier quota
        3
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            data_types: &[
                DataType::Price,
                DataType::Dividend,
                DataType::Split,
                DataType::Holdings,
                DataType::Intraday,
            ],
            supports_discovery: true,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_minute: 5,
            initial_concurrency: 1,
            max_concurrency: 1,
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let records = match request.data_type {
            DataType::Price => self.fetch_prices(request).await,
            DataType::Intraday => self.fetch_intraday(request).await,
            DataType::Dividend => self.fetch_dividends(request).await,
            DataType::Split => self.fetch_splits(request).await,
            DataType::Holdings => self.fetch_holdings(request).await,
        }?;

        debug!(
            "Alpha Vantage: fetched {} {} records for {}",
            records.len(),
            request.data_type,
            request.symbol
        );
        Ok(records)
    }
}

#[async_trait]
impl DiscoverySource for AlphaVantageProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn discover(&self) -> Result<Vec<DiscoveredSymbol>, FetchError> {
        let text = self.get(&[("function", "LISTING_STATUS")]).await?;

        // Throttling and key errors come back as JSON instead of CSV
        if text.trim_start().starts_with('{') {
            let notice: ApiNotice =
                serde_json::from_str(&text).map_err(|e| FetchError::decode(PROVIDER_ID, e))?;
            Self::check_notice(&notice, "LISTING_STATUS")?;
        }

        let symbols = Self::parse_listing(&text)?;
        debug!("Alpha Vantage: listed {} active symbols", symbols.len());
        Ok(symbols)
    }
}
