//! finsync core - the incremental synchronization engine.
//!
//! This crate decides, for every tracked symbol and data type, whether to
//! fetch, how much history to ask for, and how to record the outcome. It is
//! database-agnostic: persistence goes through the store traits
//! ([`SymbolStore`], [`CursorStore`], [`ExclusionStore`], [`RecordStore`])
//! implemented by the `storage-sqlite` crate.

pub mod constants;
pub mod errors;
pub mod events;
pub mod symbols;
pub mod sync;

pub use symbols::{AdmissionState, NewSymbol, Symbol, SymbolStore};
pub use sync::{
    CursorStore, DataTypeCursor, ExclusionRecord, ExclusionStore, RecordStore, RunMode, RunPlan,
    RunReport, SyncOrchestrator, SyncPolicy, SyncStores,
};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
