//! Typed time-series records returned by providers.
//!
//! Every record carries a natural key used by the store for idempotent
//! upserts and a watermark: the point in time it covers, which drives
//! cursor advancement.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::DataType;

/// Daily OHLCV bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub adjusted_close: Option<Decimal>,
    pub volume: Option<Decimal>,
}

/// Cash dividend keyed by ex-date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DividendEvent {
    pub symbol: String,
    pub ex_date: NaiveDate,
    pub amount: Decimal,
    pub pay_date: Option<NaiveDate>,
    pub record_date: Option<NaiveDate>,
    pub declaration_date: Option<NaiveDate>,
}

/// Stock split expressed as `numerator`-for-`denominator`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitEvent {
    pub symbol: String,
    pub date: NaiveDate,
    pub numerator: Decimal,
    pub denominator: Decimal,
}

/// One constituent of an ETF holdings snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HoldingEntry {
    pub etf_symbol: String,
    pub as_of: NaiveDate,
    pub holding_symbol: String,
    pub name: Option<String>,
    pub weight: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntradayBar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub volume: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Price(PriceBar),
    Dividend(DividendEvent),
    Split(SplitEvent),
    Holding(HoldingEntry),
    Intraday(IntradayBar),
}

impl Record {
    pub fn data_type(&self) -> DataType {
        match self {
            Record::Price(_) => DataType::Price,
            Record::Dividend(_) => DataType::Dividend,
            Record::Split(_) => DataType::Split,
            Record::Holding(_) => DataType::Holdings,
            Record::Intraday(_) => DataType::Intraday,
        }
    }

    /// Tracked symbol this record belongs to. For holdings, the ETF.
    pub fn symbol(&self) -> &str {
        match self {
            Record::Price(r) => &r.symbol,
            Record::Dividend(r) => &r.symbol,
            Record::Split(r) => &r.symbol,
            Record::Holding(r) => &r.etf_symbol,
            Record::Intraday(r) => &r.symbol,
        }
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        match self {
            Record::Price(r) => start_of_day(r.date),
            Record::Dividend(r) => start_of_day(r.ex_date),
            Record::Split(r) => start_of_day(r.date),
            Record::Holding(r) => start_of_day(r.as_of),
            Record::Intraday(r) => r.timestamp,
        }
    }

    pub fn natural_key(&self) -> String {
        match self {
            Record::Price(r) => format!("price|{}|{}", r.symbol, r.date),
            Record::Dividend(r) => format!("dividend|{}|{}", r.symbol, r.ex_date),
            Record::Split(r) => format!("split|{}|{}", r.symbol, r.date),
            Record::Holding(r) => {
                format!("holdings|{}|{}|{}", r.etf_symbol, r.as_of, r.holding_symbol)
            }
            Record::Intraday(r) => {
                format!("intraday|{}|{}", r.symbol, r.timestamp.timestamp())
            }
        }
    }
}

/// Midnight UTC of the given date.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn price(date: NaiveDate) -> Record {
        Record::Price(PriceBar {
            symbol: "AAPL".to_string(),
            date,
            open: None,
            high: None,
            low: None,
            close: dec!(190.5),
            adjusted_close: None,
            volume: None,
        })
    }

    #[test]
    fn test_price_watermark_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let record = price(date);
        assert_eq!(
            record.watermark(),
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(record.data_type(), DataType::Price);
        assert_eq!(record.symbol(), "AAPL");
    }

    #[test]
    fn test_natural_key_ignores_values() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let a = price(date);
        let mut b = price(date);
        if let Record::Price(bar) = &mut b {
            bar.close = dec!(191);
        }
        assert_eq!(a.natural_key(), b.natural_key());
    }

    #[test]
    fn test_holding_belongs_to_etf() {
        let record = Record::Holding(HoldingEntry {
            etf_symbol: "QQQ".to_string(),
            as_of: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            holding_symbol: "NVDA".to_string(),
            name: Some("NVIDIA CORP".to_string()),
            weight: Some(dec!(0.0889)),
        });
        assert_eq!(record.symbol(), "QQQ");
        assert_eq!(record.natural_key(), "holdings|QQQ|2024-06-01|NVDA");
    }
}
