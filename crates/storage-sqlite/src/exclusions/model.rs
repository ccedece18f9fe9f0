use diesel::prelude::*;
use finsync_core::errors::ValidationError;
use finsync_core::sync::ExclusionRecord;

use crate::errors::StorageError;
use crate::utils::{format_timestamp, parse_optional_timestamp, parse_timestamp};

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Insertable, AsChangeset, PartialEq)]
#[diesel(table_name = crate::schema::exclusions)]
#[diesel(primary_key(symbol))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ExclusionDB {
    pub symbol: String,
    pub reason: String,
    pub auto_excluded: bool,
    pub validation_attempts: i32,
    pub excluded_at: String,
    pub last_validated_at: Option<String>,
}

impl From<&ExclusionRecord> for ExclusionDB {
    fn from(record: &ExclusionRecord) -> Self {
        Self {
            symbol: record.symbol.clone(),
            reason: record.reason.as_str().to_string(),
            auto_excluded: record.auto_excluded,
            validation_attempts: i32::try_from(record.validation_attempts).unwrap_or(i32::MAX),
            excluded_at: format_timestamp(record.excluded_at),
            last_validated_at: record.last_validated_at.map(format_timestamp),
        }
    }
}

impl TryFrom<ExclusionDB> for ExclusionRecord {
    type Error = StorageError;

    fn try_from(db: ExclusionDB) -> Result<Self, Self::Error> {
        Ok(ExclusionRecord {
            reason: db
                .reason
                .parse()
                .map_err(|e: ValidationError| StorageError::CorruptRow(e.to_string()))?,
            auto_excluded: db.auto_excluded,
            validation_attempts: u32::try_from(db.validation_attempts).unwrap_or(0),
            excluded_at: parse_timestamp(&db.excluded_at)?,
            last_validated_at: parse_optional_timestamp(db.last_validated_at.as_deref())?,
            symbol: db.symbol,
        })
    }
}
