//! SQLite storage for time-series records, one table per data type.

mod model;
mod repository;

pub use model::{DividendEventDB, EtfHoldingDB, IntradayBarDB, PriceBarDB, SplitEventDB};
pub use repository::RecordRepository;

// Re-export trait from core for convenience
pub use finsync_core::sync::RecordStore;
