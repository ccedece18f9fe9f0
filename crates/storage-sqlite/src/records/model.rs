//! Database models for stored records.
//!
//! Decimals are stored as text to keep their exact scale; dates as
//! `YYYY-MM-DD`; intraday timestamps as fixed-width RFC 3339.

use diesel::prelude::*;
use finsync_market_data::{
    DividendEvent, HoldingEntry, IntradayBar, PriceBar, Record, SplitEvent,
};
use rust_decimal::Decimal;

use crate::errors::StorageError;
use crate::utils::{format_date, format_timestamp, parse_date, parse_decimal, parse_timestamp};

fn opt_decimal(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

fn parse_opt_decimal(raw: Option<String>) -> Result<Option<Decimal>, StorageError> {
    raw.as_deref().map(parse_decimal).transpose()
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, PartialEq)]
#[diesel(table_name = crate::schema::price_bars)]
#[diesel(primary_key(symbol, date))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PriceBarDB {
    pub symbol: String,
    pub date: String,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: String,
    pub adjusted_close: Option<String>,
    pub volume: Option<String>,
    pub updated_at: String,
}

impl PriceBarDB {
    pub fn new(bar: &PriceBar, updated_at: &str) -> Self {
        Self {
            symbol: bar.symbol.clone(),
            date: format_date(bar.date),
            open: opt_decimal(bar.open),
            high: opt_decimal(bar.high),
            low: opt_decimal(bar.low),
            close: bar.close.to_string(),
            adjusted_close: opt_decimal(bar.adjusted_close),
            volume: opt_decimal(bar.volume),
            updated_at: updated_at.to_string(),
        }
    }
}

impl TryFrom<PriceBarDB> for Record {
    type Error = StorageError;

    fn try_from(db: PriceBarDB) -> Result<Self, Self::Error> {
        Ok(Record::Price(PriceBar {
            date: parse_date(&db.date)?,
            open: parse_opt_decimal(db.open)?,
            high: parse_opt_decimal(db.high)?,
            low: parse_opt_decimal(db.low)?,
            close: parse_decimal(&db.close)?,
            adjusted_close: parse_opt_decimal(db.adjusted_close)?,
            volume: parse_opt_decimal(db.volume)?,
            symbol: db.symbol,
        }))
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, PartialEq)]
#[diesel(table_name = crate::schema::dividend_events)]
#[diesel(primary_key(symbol, ex_date))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DividendEventDB {
    pub symbol: String,
    pub ex_date: String,
    pub amount: String,
    pub pay_date: Option<String>,
    pub record_date: Option<String>,
    pub declaration_date: Option<String>,
    pub updated_at: String,
}

impl DividendEventDB {
    pub fn new(event: &DividendEvent, updated_at: &str) -> Self {
        Self {
            symbol: event.symbol.clone(),
            ex_date: format_date(event.ex_date),
            amount: event.amount.to_string(),
            pay_date: event.pay_date.map(format_date),
            record_date: event.record_date.map(format_date),
            declaration_date: event.declaration_date.map(format_date),
            updated_at: updated_at.to_string(),
        }
    }
}

impl TryFrom<DividendEventDB> for Record {
    type Error = StorageError;

    fn try_from(db: DividendEventDB) -> Result<Self, Self::Error> {
        Ok(Record::Dividend(DividendEvent {
            ex_date: parse_date(&db.ex_date)?,
            amount: parse_decimal(&db.amount)?,
            pay_date: db.pay_date.as_deref().map(parse_date).transpose()?,
            record_date: db.record_date.as_deref().map(parse_date).transpose()?,
            declaration_date: db.declaration_date.as_deref().map(parse_date).transpose()?,
            symbol: db.symbol,
        }))
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, PartialEq)]
#[diesel(table_name = crate::schema::split_events)]
#[diesel(primary_key(symbol, date))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SplitEventDB {
    pub symbol: String,
    pub date: String,
    pub numerator: String,
    pub denominator: String,
    pub updated_at: String,
}

impl SplitEventDB {
    pub fn new(split: &SplitEvent, updated_at: &str) -> Self {
        Self {
            symbol: split.symbol.clone(),
            date: format_date(split.date),
            numerator: split.numerator.to_string(),
            denominator: split.denominator.to_string(),
            updated_at: updated_at.to_string(),
        }
    }
}

impl TryFrom<SplitEventDB> for Record {
    type Error = StorageError;

    fn try_from(db: SplitEventDB) -> Result<Self, Self::Error> {
        Ok(Record::Split(SplitEvent {
            date: parse_date(&db.date)?,
            numerator: parse_decimal(&db.numerator)?,
            denominator: parse_decimal(&db.denominator)?,
            symbol: db.symbol,
        }))
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, PartialEq)]
#[diesel(table_name = crate::schema::etf_holdings)]
#[diesel(primary_key(etf_symbol, as_of, holding_symbol))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EtfHoldingDB {
    pub etf_symbol: String,
    pub as_of: String,
    pub holding_symbol: String,
    pub name: Option<String>,
    pub weight: Option<String>,
    pub updated_at: String,
}

impl EtfHoldingDB {
    pub fn new(entry: &HoldingEntry, updated_at: &str) -> Self {
        Self {
            etf_symbol: entry.etf_symbol.clone(),
            as_of: format_date(entry.as_of),
            holding_symbol: entry.holding_symbol.clone(),
            name: entry.name.clone(),
            weight: opt_decimal(entry.weight),
            updated_at: updated_at.to_string(),
        }
    }
}

impl TryFrom<EtfHoldingDB> for Record {
    type Error = StorageError;

    fn try_from(db: EtfHoldingDB) -> Result<Self, Self::Error> {
        Ok(Record::Holding(HoldingEntry {
            as_of: parse_date(&db.as_of)?,
            weight: parse_opt_decimal(db.weight)?,
            etf_symbol: db.etf_symbol,
            holding_symbol: db.holding_symbol,
            name: db.name,
        }))
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, PartialEq)]
#[diesel(table_name = crate::schema::intraday_bars)]
#[diesel(primary_key(symbol, ts))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IntradayBarDB {
    pub symbol: String,
    pub ts: String,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: String,
    pub volume: Option<String>,
    pub updated_at: String,
}

impl IntradayBarDB {
    pub fn new(bar: &IntradayBar, updated_at: &str) -> Self {
        Self {
            symbol: bar.symbol.clone(),
            ts: format_timestamp(bar.timestamp),
            open: opt_decimal(bar.open),
            high: opt_decimal(bar.high),
            low: opt_decimal(bar.low),
            close: bar.close.to_string(),
            volume: opt_decimal(bar.volume),
            updated_at: updated_at.to_string(),
        }
    }
}

impl TryFrom<IntradayBarDB> for Record {
    type Error = StorageError;

    fn try_from(db: IntradayBarDB) -> Result<Self, Self::Error> {
        Ok(Record::Intraday(IntradayBar {
            timestamp: parse_timestamp(&db.ts)?,
            open: parse_opt_decimal(db.open)?,
            high: parse_opt_decimal(db.high)?,
            low: parse_opt_decimal(db.low)?,
            close: parse_decimal(&db.close)?,
            volume: parse_opt_decimal(db.volume)?,
            symbol: db.symbol,
        }))
    }
}
