//! SQLite storage implementation for finsync.
//!
//! This crate provides all database-related functionality using Diesel ORM with SQLite.
//! It implements the store traits defined in `finsync-core` and contains:
//! - Database connection pooling and management
//! - Diesel migrations
//! - Repository implementations for symbols, cursors, exclusions and records
//! - Database-specific model types (with Diesel derives)
//!
//! # Architecture
//!
//! This crate is the only place in the workspace where Diesel dependencies exist.
//! The engine in `core` is database-agnostic and works with traits.
//!
//! ```text
//!        core (engine)
//!              │
//!              ▼
//!   storage-sqlite (this crate)
//!              │
//!              ▼
//!          SQLite DB
//! ```
//!
//! Reads use pooled connections; every write goes through the single
//! [`WriteHandle`] actor inside an immediate transaction.

pub mod db;
pub mod errors;
pub mod schema;
pub mod utils;

#[cfg(test)]
mod test_support;

// Repository implementations
pub mod cursors;
pub mod exclusions;
pub mod records;
pub mod symbols;

use std::sync::Arc;

use finsync_core::sync::SyncStores;

// Re-export database utilities
pub use db::{create_pool, get_connection, init, run_migrations, DbConnection, DbPool, WriteHandle};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

pub use cursors::CursorRepository;
pub use exclusions::ExclusionRepository;
pub use records::RecordRepository;
pub use symbols::SymbolRepository;

// Re-export from finsync-core for convenience
pub use finsync_core::errors::{DatabaseError, Error, Result};

/// Opens the database at `db_path`, applies pending migrations and wires
/// every repository to one pool and one writer.
///
/// Must be called from within a Tokio runtime.
pub fn open_stores(db_path: &str) -> Result<SyncStores> {
    let db_path = init(db_path)?;
    let pool = create_pool(&db_path)?;
    run_migrations(&pool)?;
    let writer = db::write_actor::spawn_writer((*pool).clone());

    Ok(SyncStores {
        symbols: Arc::new(SymbolRepository::new(pool.clone(), writer.clone())),
        cursors: Arc::new(CursorRepository::new(pool.clone(), writer.clone())),
        exclusions: Arc::new(ExclusionRepository::new(pool.clone(), writer.clone())),
        records: Arc::new(RecordRepository::new(pool, writer)),
    })
}
