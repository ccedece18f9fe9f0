//! Helpers shared by the repositories: bind-limit chunking and the text
//! encodings used for timestamps, dates and decimals.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;

use crate::errors::StorageError;

/// Maximum number of parameters for SQLite IN (...) queries.
///
/// SQLite caps bound parameters per statement (SQLITE_MAX_VARIABLE_NUMBER,
/// 999 on older builds). 500 leaves room for the other parameters of a query.
pub const SQLITE_MAX_PARAMS_CHUNK: usize = 500;

/// Chunk a slice into slices of at most [`SQLITE_MAX_PARAMS_CHUNK`] items.
pub fn chunk_for_sqlite<T>(items: &[T]) -> impl Iterator<Item = &[T]> {
    items.chunks(SQLITE_MAX_PARAMS_CHUNK)
}

/// Fixed-width RFC 3339 in UTC, so text comparison orders like time.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRow(format!("bad timestamp '{}': {}", raw, e)))
}

pub fn parse_optional_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.map(parse_timestamp).transpose()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| StorageError::CorruptRow(format!("bad date '{}': {}", raw, e)))
}

pub fn parse_decimal(raw: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(raw)
        .map_err(|e| StorageError::CorruptRow(format!("bad decimal '{}': {}", raw, e)))
}
