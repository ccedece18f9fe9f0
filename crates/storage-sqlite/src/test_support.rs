//! Temp-directory database for repository tests.

use std::sync::Arc;

use finsync_core::symbols::{AdmissionState, NewSymbol, SymbolStore};
use finsync_market_data::AssetKind;
use tempfile::TempDir;

use crate::db::{create_pool, get_connection, init, run_migrations, write_actor::spawn_writer};
use crate::{
    CursorRepository, DbConnection, DbPool, ExclusionRepository, RecordRepository,
    SymbolRepository, WriteHandle,
};

pub(crate) struct TestDb {
    pub pool: Arc<DbPool>,
    pub writer: WriteHandle,
    _dir: TempDir,
}

impl TestDb {
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = dir.path().join("finsync.db").to_string_lossy().to_string();
        let db_path = init(&db_path).expect("Failed to init database");
        let pool = create_pool(&db_path).expect("Failed to create pool");
        run_migrations(&pool).expect("Failed to run migrations");
        let writer = spawn_writer((*pool).clone());
        Self {
            pool,
            writer,
            _dir: dir,
        }
    }

    pub fn conn(&self) -> DbConnection {
        get_connection(&self.pool).expect("Failed to get connection")
    }

    pub fn symbols(&self) -> SymbolRepository {
        SymbolRepository::new(self.pool.clone(), self.writer.clone())
    }

    pub fn cursors(&self) -> CursorRepository {
        CursorRepository::new(self.pool.clone(), self.writer.clone())
    }

    pub fn exclusions(&self) -> ExclusionRepository {
        ExclusionRepository::new(self.pool.clone(), self.writer.clone())
    }

    pub fn records(&self) -> RecordRepository {
        RecordRepository::new(self.pool.clone(), self.writer.clone())
    }

    /// Registers `code` and moves it to `state`.
    pub async fn track(&self, code: &str, kind: AssetKind, state: AdmissionState) {
        let symbols = self.symbols();
        symbols
            .insert_pending(vec![NewSymbol {
                symbol: code.to_string(),
                name: None,
                exchange: None,
                asset_kind: kind,
                discovery_source: None,
            }])
            .await
            .expect("Failed to insert symbol");
        if state != AdmissionState::Pending {
            symbols.set_state(code, state).await.expect("Failed to set state");
        }
    }
}
