use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use log::debug;
use std::sync::Arc;

use super::model::ExclusionDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::exclusions::dsl as exc_dsl;
use finsync_core::errors::{DatabaseError, Error};
use finsync_core::sync::{ExclusionRecord, ExclusionStore};
use finsync_core::Result;

pub struct ExclusionRepository {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl ExclusionRepository {
    pub fn new(pool: Arc<Pool<ConnectionManager<SqliteConnection>>>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl ExclusionStore for ExclusionRepository {
    fn get_exclusion(&self, symbol: &str) -> Result<Option<ExclusionRecord>> {
        let mut conn = get_connection(&self.pool)?;

        let row = exc_dsl::exclusions
            .find(symbol)
            .select(ExclusionDB::as_select())
            .first::<ExclusionDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        row.map(|r| ExclusionRecord::try_from(r).map_err(Error::from))
            .transpose()
    }

    fn list_exclusions(&self) -> Result<Vec<ExclusionRecord>> {
        let mut conn = get_connection(&self.pool)?;

        let rows = exc_dsl::exclusions
            .order(exc_dsl::excluded_at.desc())
            .select(ExclusionDB::as_select())
            .load::<ExclusionDB>(&mut conn)
            .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|r| ExclusionRecord::try_from(r).map_err(Error::from))
            .collect()
    }

    async fn create_exclusion(&self, record: ExclusionRecord) -> Result<bool> {
        let row = ExclusionDB::from(&record);

        let inserted = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::insert_into(exc_dsl::exclusions)
                    .values(&row)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .map_err(StorageError::from)?)
            })
            .await?;

        debug!(
            "Exclusion for {} ({}): {}",
            record.symbol,
            record.reason,
            if inserted > 0 { "created" } else { "already present" }
        );
        Ok(inserted > 0)
    }

    async fn update_exclusion(&self, record: ExclusionRecord) -> Result<()> {
        let row = ExclusionDB::from(&record);

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let updated = diesel::update(exc_dsl::exclusions.find(row.symbol.clone()))
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Err(Error::Database(DatabaseError::NotFound(format!(
                        "exclusion {}",
                        row.symbol
                    ))));
                }
                Ok(())
            })
            .await
    }

    async fn delete_exclusion(&self, symbol: &str) -> Result<bool> {
        let symbol_owned = symbol.to_string();

        let deleted = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::delete(exc_dsl::exclusions.find(symbol_owned))
                    .execute(conn)
                    .map_err(StorageError::from)?)
            })
            .await?;

        Ok(deleted > 0)
    }
}
