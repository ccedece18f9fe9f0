use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_types::Text;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use super::model::CursorDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::symbols::dsl as sym_dsl;
use crate::schema::sync_cursors::dsl as cur_dsl;
use crate::symbols::SymbolDB;
use crate::utils::format_timestamp;
use finsync_core::errors::Error;
use finsync_core::symbols::{AdmissionState, Symbol};
use finsync_core::sync::{AttemptOutcome, CursorStore, DataTypeCursor, SyncCandidate};
use finsync_core::Result;
use finsync_market_data::DataType;

// last_synced_at only moves forward: the stored value wins unless the new
// watermark is later. Counters reset because data arrived.
const ADVANCE_CURSOR_SQL: &str = r#"
    INSERT INTO sync_cursors (
        symbol, data_type, last_synced_at, last_attempt_at,
        consecutive_failure_count, consecutive_empty_count, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)
    ON CONFLICT (symbol, data_type) DO UPDATE SET
        last_synced_at = CASE
            WHEN sync_cursors.last_synced_at IS NULL
                OR excluded.last_synced_at > sync_cursors.last_synced_at
            THEN excluded.last_synced_at
            ELSE sync_cursors.last_synced_at
        END,
        last_attempt_at = excluded.last_attempt_at,
        consecutive_failure_count = 0,
        consecutive_empty_count = 0,
        updated_at = excluded.updated_at
"#;

pub struct CursorRepository {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl CursorRepository {
    pub fn new(pool: Arc<Pool<ConnectionManager<SqliteConnection>>>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

fn load_cursor(
    conn: &mut SqliteConnection,
    symbol: &str,
    data_type: DataType,
) -> Result<Option<DataTypeCursor>> {
    let row = cur_dsl::sync_cursors
        .find((symbol, data_type.as_str()))
        .select(CursorDB::as_select())
        .first::<CursorDB>(conn)
        .optional()
        .map_err(StorageError::from)?;

    row.map(|r| DataTypeCursor::try_from(r).map_err(Error::from))
        .transpose()
}

fn require_cursor(
    conn: &mut SqliteConnection,
    symbol: &str,
    data_type: DataType,
) -> Result<DataTypeCursor> {
    load_cursor(conn, symbol, data_type)?.ok_or_else(|| {
        Error::Database(finsync_core::errors::DatabaseError::NotFound(format!(
            "cursor {} {}",
            symbol, data_type
        )))
    })
}

#[async_trait]
impl CursorStore for CursorRepository {
    fn get_cursor(&self, symbol: &str, data_type: DataType) -> Result<Option<DataTypeCursor>> {
        let mut conn = get_connection(&self.pool)?;
        load_cursor(&mut conn, symbol, data_type)
    }

    fn list_cursors(&self, symbol: &str) -> Result<Vec<DataTypeCursor>> {
        let mut conn = get_connection(&self.pool)?;

        let rows = cur_dsl::sync_cursors
            .filter(cur_dsl::symbol.eq(symbol))
            .select(CursorDB::as_select())
            .load::<CursorDB>(&mut conn)
            .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|r| DataTypeCursor::try_from(r).map_err(Error::from))
            .collect()
    }

    fn list_sync_candidates(&self, data_type: DataType) -> Result<Vec<SyncCandidate>> {
        let mut conn = get_connection(&self.pool)?;

        let rows: Vec<(SymbolDB, Option<CursorDB>)> = sym_dsl::symbols
            .left_join(
                cur_dsl::sync_cursors.on(cur_dsl::symbol
                    .eq(sym_dsl::symbol)
                    .and(cur_dsl::data_type.eq(data_type.as_str()))),
            )
            .filter(sym_dsl::state.ne(AdmissionState::Pending.as_str()))
            .order(sym_dsl::symbol.asc())
            .select((SymbolDB::as_select(), Option::<CursorDB>::as_select()))
            .load(&mut conn)
            .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|(symbol_row, cursor_row)| {
                let symbol = Symbol::try_from(symbol_row)?;
                let cursor = cursor_row.map(DataTypeCursor::try_from).transpose()?;
                Ok(SyncCandidate {
                    symbol: symbol.symbol,
                    asset_kind: symbol.asset_kind,
                    state: symbol.state,
                    cursor,
                })
            })
            .collect::<std::result::Result<Vec<_>, StorageError>>()
            .map_err(Error::from)
    }

    async fn advance_cursor(
        &self,
        symbol: &str,
        data_type: DataType,
        watermark: DateTime<Utc>,
        attempted_at: DateTime<Utc>,
    ) -> Result<DataTypeCursor> {
        let symbol_owned = symbol.to_string();
        let watermark = format_timestamp(watermark);
        let attempted_at = format_timestamp(attempted_at);
        let now = format_timestamp(Utc::now());

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<DataTypeCursor> {
                diesel::sql_query(ADVANCE_CURSOR_SQL)
                    .bind::<Text, _>(&symbol_owned)
                    .bind::<Text, _>(data_type.as_str())
                    .bind::<Text, _>(&watermark)
                    .bind::<Text, _>(&attempted_at)
                    .bind::<Text, _>(&now)
                    .execute(conn)
                    .map_err(StorageError::from)?;

                require_cursor(conn, &symbol_owned, data_type)
            })
            .await
    }

    async fn record_attempt(
        &self,
        symbol: &str,
        data_type: DataType,
        outcome: AttemptOutcome,
        attempted_at: DateTime<Utc>,
    ) -> Result<DataTypeCursor> {
        let symbol_owned = symbol.to_string();

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<DataTypeCursor> {
                let mut cursor = load_cursor(conn, &symbol_owned, data_type)?
                    .unwrap_or_else(|| DataTypeCursor::new(symbol_owned.clone(), data_type));
                cursor.apply_attempt(outcome, attempted_at);

                diesel::replace_into(cur_dsl::sync_cursors)
                    .values(CursorDB::from_domain(&cursor, Utc::now()))
                    .execute(conn)
                    .map_err(StorageError::from)?;

                Ok(cursor)
            })
            .await
    }

    async fn reset_for_readmission(&self, symbol: &str) -> Result<()> {
        let symbol_owned = symbol.to_string();
        let now = format_timestamp(Utc::now());

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::update(cur_dsl::sync_cursors.filter(cur_dsl::symbol.eq(&symbol_owned)))
                    .set((
                        cur_dsl::consecutive_empty_count.eq(0),
                        cur_dsl::last_checked_at.eq(None::<String>),
                        cur_dsl::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestDb;
    use chrono::{Duration, TimeZone};
    use finsync_market_data::AssetKind;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_advance_creates_then_never_moves_backwards() {
        let db = TestDb::new();
        db.track("AAPL", AssetKind::Equity, AdmissionState::Active).await;
        let repo = db.cursors();

        let cursor = repo
            .advance_cursor("AAPL", DataType::Price, day(10), day(11))
            .await
            .unwrap();
        assert_eq!(cursor.last_synced_at, Some(day(10)));

        let cursor = repo
            .advance_cursor("AAPL", DataType::Price, day(5), day(12))
            .await
            .unwrap();
        assert_eq!(cursor.last_synced_at, Some(day(10)));
        assert_eq!(cursor.last_attempt_at, Some(day(12)));

        let cursor = repo
            .advance_cursor("AAPL", DataType::Price, day(15), day(16))
            .await
            .unwrap();
        assert_eq!(cursor.last_synced_at, Some(day(15)));
        assert_eq!(
            repo.get_cursor("AAPL", DataType::Price).unwrap(),
            Some(cursor)
        );
    }

    #[tokio::test]
    async fn test_storage_matches_in_memory_cursor_semantics() {
        let db = TestDb::new();
        db.track("MSFT", AssetKind::Equity, AdmissionState::Active).await;
        let repo = db.cursors();
        let mut expected = DataTypeCursor::new("MSFT", DataType::Dividend);

        let steps: Vec<(Option<AttemptOutcome>, DateTime<Utc>)> = vec![
            (Some(AttemptOutcome::Failure), day(1)),
            (Some(AttemptOutcome::Failure), day(2)),
            (Some(AttemptOutcome::Empty), day(3)),
            (None, day(4)),
            (Some(AttemptOutcome::NoNewData), day(5)),
            (Some(AttemptOutcome::Empty), day(6)),
        ];

        for (outcome, at) in steps {
            let stored = match outcome {
                Some(outcome) => {
                    expected.apply_attempt(outcome, at);
                    repo.record_attempt("MSFT", DataType::Dividend, outcome, at)
                        .await
                        .unwrap()
                }
                None => {
                    let watermark = at - Duration::days(1);
                    expected.apply_advance(watermark, at);
                    repo.advance_cursor("MSFT", DataType::Dividend, watermark, at)
                        .await
                        .unwrap()
                }
            };
            assert_eq!(stored, expected);
        }

        repo.reset_for_readmission("MSFT").await.unwrap();
        expected.apply_readmission();
        assert_eq!(
            repo.get_cursor("MSFT", DataType::Dividend).unwrap(),
            Some(expected)
        );
    }

    #[tokio::test]
    async fn test_sync_candidates_join_cursor_and_skip_pending() {
        let db = TestDb::new();
        db.track("AAPL", AssetKind::Equity, AdmissionState::Active).await;
        db.track("QQQ", AssetKind::Etf, AdmissionState::Excluded).await;
        db.track("NEWCO", AssetKind::Equity, AdmissionState::Pending).await;
        let repo = db.cursors();
        repo.advance_cursor("AAPL", DataType::Price, day(10), day(10))
            .await
            .unwrap();
        repo.advance_cursor("AAPL", DataType::Dividend, day(1), day(10))
            .await
            .unwrap();

        let candidates = repo.list_sync_candidates(DataType::Price).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].symbol, "AAPL");
        assert_eq!(
            candidates[0].cursor.as_ref().and_then(|c| c.last_synced_at),
            Some(day(10))
        );
        assert_eq!(candidates[1].symbol, "QQQ");
        assert_eq!(candidates[1].state, AdmissionState::Excluded);
        assert!(candidates[1].cursor.is_none());

        assert_eq!(repo.list_cursors("AAPL").unwrap().len(), 2);
    }
}
