//! Database model for tracked symbols.

use diesel::prelude::*;
use finsync_core::symbols::{NewSymbol, Symbol};
use chrono::{DateTime, Utc};

use crate::errors::StorageError;
use crate::utils::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Insertable, PartialEq)]
#[diesel(table_name = crate::schema::symbols)]
#[diesel(primary_key(symbol))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SymbolDB {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub asset_kind: String,
    pub discovery_source: Option<String>,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
}

impl SymbolDB {
    pub fn pending(new_symbol: NewSymbol, now: DateTime<Utc>) -> Self {
        let now = format_timestamp(now);
        Self {
            symbol: new_symbol.symbol,
            name: new_symbol.name,
            exchange: new_symbol.exchange,
            asset_kind: new_symbol.asset_kind.as_str().to_string(),
            discovery_source: new_symbol.discovery_source,
            state: finsync_core::AdmissionState::Pending.as_str().to_string(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl TryFrom<SymbolDB> for Symbol {
    type Error = StorageError;

    fn try_from(db: SymbolDB) -> Result<Self, Self::Error> {
        Ok(Symbol {
            asset_kind: db.asset_kind.parse().map_err(StorageError::CorruptRow)?,
            state: db
                .state
                .parse()
                .map_err(|e: finsync_core::errors::ValidationError| {
                    StorageError::CorruptRow(e.to_string())
                })?,
            created_at: parse_timestamp(&db.created_at)?,
            updated_at: parse_timestamp(&db.updated_at)?,
            symbol: db.symbol,
            name: db.name,
            exchange: db.exchange,
            discovery_source: db.discovery_source,
        })
    }
}
