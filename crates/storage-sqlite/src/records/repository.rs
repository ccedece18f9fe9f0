use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use log::debug;
use std::sync::Arc;

use super::model::{DividendEventDB, EtfHoldingDB, IntradayBarDB, PriceBarDB, SplitEventDB};
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{dividend_events, etf_holdings, intraday_bars, price_bars, split_events};
use crate::utils::format_timestamp;
use finsync_core::errors::Error;
use finsync_core::sync::RecordStore;
use finsync_core::Result;
use finsync_market_data::{DataType, Record};

pub struct RecordRepository {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl RecordRepository {
    pub fn new(pool: Arc<Pool<ConnectionManager<SqliteConnection>>>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Stored records of one symbol and data type, oldest first.
    pub fn load_records(&self, symbol: &str, data_type: DataType) -> Result<Vec<Record>> {
        let mut conn = get_connection(&self.pool)?;

        let records: std::result::Result<Vec<Record>, StorageError> = match data_type {
            DataType::Price => price_bars::table
                .filter(price_bars::symbol.eq(symbol))
                .order(price_bars::date.asc())
                .select(PriceBarDB::as_select())
                .load::<PriceBarDB>(&mut conn)
                .map_err(StorageError::from)?
                .into_iter()
                .map(Record::try_from)
                .collect(),
            DataType::Dividend => dividend_events::table
                .filter(dividend_events::symbol.eq(symbol))
                .order(dividend_events::ex_date.asc())
                .select(DividendEventDB::as_select())
                .load::<DividendEventDB>(&mut conn)
                .map_err(StorageError::from)?
                .into_iter()
                .map(Record::try_from)
                .collect(),
            DataType::Split => split_events::table
                .filter(split_events::symbol.eq(symbol))
                .order(split_events::date.asc())
                .select(SplitEventDB::as_select())
                .load::<SplitEventDB>(&mut conn)
                .map_err(StorageError::from)?
                .into_iter()
                .map(Record::try_from)
                .collect(),
            DataType::Holdings => etf_holdings::table
                .filter(etf_holdings::etf_symbol.eq(symbol))
                .order((etf_holdings::as_of.asc(), etf_holdings::holding_symbol.asc()))
                .select(EtfHoldingDB::as_select())
                .load::<EtfHoldingDB>(&mut conn)
                .map_err(StorageError::from)?
                .into_iter()
                .map(Record::try_from)
                .collect(),
            DataType::Intraday => intraday_bars::table
                .filter(intraday_bars::symbol.eq(symbol))
                .order(intraday_bars::ts.asc())
                .select(IntradayBarDB::as_select())
                .load::<IntradayBarDB>(&mut conn)
                .map_err(StorageError::from)?
                .into_iter()
                .map(Record::try_from)
                .collect(),
        };

        records.map_err(Error::from)
    }
}

/// Upserts one record by its natural key.
fn upsert_record(conn: &mut SqliteConnection, record: &Record, now: &str) -> QueryResult<usize> {
    match record {
        Record::Price(bar) => {
            let row = PriceBarDB::new(bar, now);
            diesel::insert_into(price_bars::table)
                .values(&row)
                .on_conflict((price_bars::symbol, price_bars::date))
                .do_update()
                .set(&row)
                .execute(conn)
        }
        Record::Dividend(event) => {
            let row = DividendEventDB::new(event, now);
            diesel::insert_into(dividend_events::table)
                .values(&row)
                .on_conflict((dividend_events::symbol, dividend_events::ex_date))
                .do_update()
                .set(&row)
                .execute(conn)
        }
        Record::Split(split) => {
            let row = SplitEventDB::new(split, now);
            diesel::insert_into(split_events::table)
                .values(&row)
                .on_conflict((split_events::symbol, split_events::date))
                .do_update()
                .set(&row)
                .execute(conn)
        }
        Record::Holding(entry) => {
            let row = EtfHoldingDB::new(entry, now);
            diesel::insert_into(etf_holdings::table)
                .values(&row)
                .on_conflict((
                    etf_holdings::etf_symbol,
                    etf_holdings::as_of,
                    etf_holdings::holding_symbol,
                ))
                .do_update()
                .set(&row)
                .execute(conn)
        }
        Record::Intraday(bar) => {
            let row = IntradayBarDB::new(bar, now);
            diesel::insert_into(intraday_bars::table)
                .values(&row)
                .on_conflict((intraday_bars::symbol, intraday_bars::ts))
                .do_update()
                .set(&row)
                .execute(conn)
        }
    }
}

#[async_trait]
impl RecordStore for RecordRepository {
    async fn upsert_records(&self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let records = records.to_vec();
        let now = format_timestamp(Utc::now());

        let written = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let mut total = 0;
                for record in &records {
                    total += upsert_record(conn, record, &now).map_err(StorageError::from)?;
                }
                Ok(total)
            })
            .await?;

        debug!("Upserted {} records", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestDb;
    use chrono::{NaiveDate, TimeZone};
    use finsync_market_data::{DividendEvent, HoldingEntry, IntradayBar, PriceBar, SplitEvent};
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, day: u32, close: rust_decimal::Decimal) -> Record {
        Record::Price(PriceBar {
            symbol: symbol.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            open: Some(dec!(10.00)),
            high: None,
            low: None,
            close,
            adjusted_close: None,
            volume: Some(dec!(1500)),
        })
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_updates_values() {
        let db = TestDb::new();
        let repo = db.records();
        let batch = vec![bar("AAPL", 1, dec!(10.5)), bar("AAPL", 2, dec!(10.75))];

        repo.upsert_records(&batch).await.unwrap();
        repo.upsert_records(&batch).await.unwrap();
        assert_eq!(repo.load_records("AAPL", DataType::Price).unwrap(), batch);

        // Same natural key, corrected close.
        let corrected = bar("AAPL", 2, dec!(10.80));
        repo.upsert_records(std::slice::from_ref(&corrected))
            .await
            .unwrap();
        let stored = repo.load_records("AAPL", DataType::Price).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1], corrected);
    }

    #[tokio::test]
    async fn test_upsert_routes_every_record_type() {
        let db = TestDb::new();
        let repo = db.records();
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let records = vec![
            Record::Dividend(DividendEvent {
                symbol: "KO".to_string(),
                ex_date: date,
                amount: dec!(0.485),
                pay_date: Some(date + chrono::Duration::days(14)),
                record_date: None,
                declaration_date: None,
            }),
            Record::Split(SplitEvent {
                symbol: "NVDA".to_string(),
                date,
                numerator: dec!(10),
                denominator: dec!(1),
            }),
            Record::Holding(HoldingEntry {
                etf_symbol: "QQQ".to_string(),
                as_of: date,
                holding_symbol: "MSFT".to_string(),
                name: Some("MICROSOFT CORP".to_string()),
                weight: Some(dec!(0.0871)),
            }),
            Record::Intraday(IntradayBar {
                symbol: "SPY".to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 14, 35, 0).unwrap(),
                open: None,
                high: None,
                low: None,
                close: dec!(527.12),
                volume: None,
            }),
        ];

        assert_eq!(repo.upsert_records(&records).await.unwrap(), 4);
        assert_eq!(repo.load_records("KO", DataType::Dividend).unwrap(), vec![records[0].clone()]);
        assert_eq!(repo.load_records("NVDA", DataType::Split).unwrap(), vec![records[1].clone()]);
        assert_eq!(repo.load_records("QQQ", DataType::Holdings).unwrap(), vec![records[2].clone()]);
        assert_eq!(repo.load_records("SPY", DataType::Intraday).unwrap(), vec![records[3].clone()]);
    }

    #[tokio::test]
    async fn test_failed_batch_writes_nothing() {
        let db = TestDb::new();
        let repo = db.records();
        {
            let mut conn = db.conn();
            diesel::sql_query(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON price_bars \
                 WHEN NEW.symbol = 'BAD' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
            )
            .execute(&mut conn)
            .unwrap();
        }

        let batch = vec![bar("GOOD", 1, dec!(1)), bar("BAD", 1, dec!(1))];
        assert!(repo.upsert_records(&batch).await.is_err());
        assert!(repo.load_records("GOOD", DataType::Price).unwrap().is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            #[test]
            fn prop_replaying_batches_changes_nothing(
                batches in proptest::collection::vec(
                    proptest::collection::vec((1u32..28, 1i64..10_000), 1..12),
                    1..5,
                )
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let db = TestDb::new();
                    let repo = db.records();
                    let batches: Vec<Vec<Record>> = batches
                        .into_iter()
                        .map(|batch| {
                            batch
                                .into_iter()
                                .map(|(day, cents)| bar("PROP", day, rust_decimal::Decimal::new(cents, 2)))
                                .collect()
                        })
                        .collect();

                    for batch in &batches {
                        repo.upsert_records(batch).await.unwrap();
                    }
                    let once = repo.load_records("PROP", DataType::Price).unwrap();

                    for batch in &batches {
                        repo.upsert_records(batch).await.unwrap();
                    }
                    let twice = repo.load_records("PROP", DataType::Price).unwrap();

                    prop_assert_eq!(once, twice);
                    Ok(())
                })?;
            }
        }
    }
}
