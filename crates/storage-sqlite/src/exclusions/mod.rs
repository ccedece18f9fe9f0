//! SQLite storage for symbol exclusions.

mod model;
mod repository;

pub use model::ExclusionDB;
pub use repository::ExclusionRepository;

// Re-export trait from core for convenience
pub use finsync_core::sync::ExclusionStore;
