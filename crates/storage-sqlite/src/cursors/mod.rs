//! SQLite storage for per-(symbol, data type) sync cursors.

mod model;
mod repository;

pub use model::CursorDB;
pub use repository::CursorRepository;

// Re-export trait from core for convenience
pub use finsync_core::sync::CursorStore;
