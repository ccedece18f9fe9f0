//! SQLite storage for the tracked symbol universe.

mod model;
mod repository;

pub use model::SymbolDB;
pub use repository::SymbolRepository;

// Re-export trait from core for convenience
pub use finsync_core::symbols::SymbolStore;
