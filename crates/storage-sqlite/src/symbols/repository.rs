use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use super::model::SymbolDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::symbols::dsl as sym_dsl;
use crate::utils::{chunk_for_sqlite, format_timestamp};
use finsync_core::errors::{DatabaseError, Error};
use finsync_core::symbols::{AdmissionState, NewSymbol, Symbol, SymbolStore};
use finsync_core::Result;

pub struct SymbolRepository {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl SymbolRepository {
    pub fn new(pool: Arc<Pool<ConnectionManager<SqliteConnection>>>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

fn into_symbols(rows: Vec<SymbolDB>) -> Result<Vec<Symbol>> {
    rows.into_iter()
        .map(|row| Symbol::try_from(row).map_err(Error::from))
        .collect()
}

#[async_trait]
impl SymbolStore for SymbolRepository {
    fn get_symbols(&self, codes: &[String]) -> Result<HashMap<String, Symbol>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = get_connection(&self.pool)?;
        let mut result_map = HashMap::new();

        for chunk in chunk_for_sqlite(codes) {
            let rows = sym_dsl::symbols
                .filter(sym_dsl::symbol.eq_any(chunk))
                .select(SymbolDB::as_select())
                .load::<SymbolDB>(&mut conn)
                .map_err(StorageError::from)?;

            for symbol in into_symbols(rows)? {
                result_map.insert(symbol.symbol.clone(), symbol);
            }
        }

        Ok(result_map)
    }

    fn list_by_state(&self, state: AdmissionState) -> Result<Vec<Symbol>> {
        let mut conn = get_connection(&self.pool)?;

        let rows = sym_dsl::symbols
            .filter(sym_dsl::state.eq(state.as_str()))
            .order(sym_dsl::symbol.asc())
            .select(SymbolDB::as_select())
            .load::<SymbolDB>(&mut conn)
            .map_err(StorageError::from)?;

        into_symbols(rows)
    }

    async fn insert_pending(&self, symbols: Vec<NewSymbol>) -> Result<usize> {
        if symbols.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let rows: Vec<SymbolDB> = symbols
            .into_iter()
            .map(|s| SymbolDB::pending(s, now))
            .collect();

        let inserted = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let mut total = 0;
                for row in &rows {
                    // Tracked symbols keep their state and metadata.
                    total += diesel::insert_into(sym_dsl::symbols)
                        .values(row)
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(total)
            })
            .await?;

        debug!("Inserted {} pending symbols", inserted);
        Ok(inserted)
    }

    async fn set_state(&self, symbol: &str, state: AdmissionState) -> Result<()> {
        let symbol_owned = symbol.to_string();
        let now = format_timestamp(Utc::now());

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let updated = diesel::update(sym_dsl::symbols.find(symbol_owned.as_str()))
                    .set((
                        sym_dsl::state.eq(state.as_str()),
                        sym_dsl::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Err(Error::Database(DatabaseError::NotFound(format!(
                        "symbol {}",
                        symbol_owned
                    ))));
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestDb;
    use finsync_market_data::AssetKind;

    fn new_symbol(code: &str, kind: AssetKind) -> NewSymbol {
        NewSymbol {
            symbol: code.to_string(),
            name: Some(format!("{} Inc", code)),
            exchange: Some("NYSE".to_string()),
            asset_kind: kind,
            discovery_source: Some("ALPHA_VANTAGE".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_pending_skips_tracked_symbols() {
        let db = TestDb::new();
        let repo = db.symbols();

        let inserted = repo
            .insert_pending(vec![new_symbol("AAPL", AssetKind::Equity), new_symbol("QQQ", AssetKind::Etf)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        repo.set_state("AAPL", AdmissionState::Active).await.unwrap();
        let inserted = repo
            .insert_pending(vec![new_symbol("AAPL", AssetKind::Equity), new_symbol("MSFT", AssetKind::Equity)])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let found = repo
            .get_symbols(&["AAPL".to_string(), "QQQ".to_string(), "NOPE".to_string()])
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["AAPL"].state, AdmissionState::Active);
        assert_eq!(found["QQQ"].asset_kind, AssetKind::Etf);
        assert_eq!(found["QQQ"].discovery_source.as_deref(), Some("ALPHA_VANTAGE"));
    }

    #[tokio::test]
    async fn test_list_by_state() {
        let db = TestDb::new();
        let repo = db.symbols();
        repo.insert_pending(vec![
            new_symbol("A", AssetKind::Equity),
            new_symbol("B", AssetKind::Equity),
            new_symbol("C", AssetKind::Trust),
        ])
        .await
        .unwrap();
        repo.set_state("B", AdmissionState::Excluded).await.unwrap();

        let pending: Vec<String> = repo
            .list_by_state(AdmissionState::Pending)
            .unwrap()
            .into_iter()
            .map(|s| s.symbol)
            .collect();
        assert_eq!(pending, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(repo.list_by_state(AdmissionState::Excluded).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_state_of_unknown_symbol_is_not_found() {
        let db = TestDb::new();
        let err = db
            .symbols()
            .set_state("GHOST", AdmissionState::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::NotFound(_))));
    }
}
