//! Database model for sync cursors.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use finsync_core::sync::DataTypeCursor;

use crate::errors::StorageError;
use crate::utils::{format_timestamp, parse_optional_timestamp};

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Insertable, PartialEq)]
#[diesel(table_name = crate::schema::sync_cursors)]
#[diesel(primary_key(symbol, data_type))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CursorDB {
    pub symbol: String,
    pub data_type: String,
    pub last_synced_at: Option<String>,
    pub last_checked_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub consecutive_failure_count: i32,
    pub consecutive_empty_count: i32,
    pub updated_at: String,
}

impl CursorDB {
    pub fn from_domain(cursor: &DataTypeCursor, now: DateTime<Utc>) -> Self {
        Self {
            symbol: cursor.symbol.clone(),
            data_type: cursor.data_type.as_str().to_string(),
            last_synced_at: cursor.last_synced_at.map(format_timestamp),
            last_checked_at: cursor.last_checked_at.map(format_timestamp),
            last_attempt_at: cursor.last_attempt_at.map(format_timestamp),
            consecutive_failure_count: to_column(cursor.consecutive_failure_count),
            consecutive_empty_count: to_column(cursor.consecutive_empty_count),
            updated_at: format_timestamp(now),
        }
    }
}

fn to_column(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

impl TryFrom<CursorDB> for DataTypeCursor {
    type Error = StorageError;

    fn try_from(db: CursorDB) -> Result<Self, Self::Error> {
        Ok(DataTypeCursor {
            data_type: db
                .data_type
                .parse()
                .map_err(|e: finsync_market_data::models::ParseDataTypeError| {
                    StorageError::CorruptRow(e.to_string())
                })?,
            last_synced_at: parse_optional_timestamp(db.last_synced_at.as_deref())?,
            last_checked_at: parse_optional_timestamp(db.last_checked_at.as_deref())?,
            last_attempt_at: parse_optional_timestamp(db.last_attempt_at.as_deref())?,
            consecutive_failure_count: u32::try_from(db.consecutive_failure_count).unwrap_or(0),
            consecutive_empty_count: u32::try_from(db.consecutive_empty_count).unwrap_or(0),
            symbol: db.symbol,
        })
    }
}
