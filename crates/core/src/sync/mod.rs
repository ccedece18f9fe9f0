//! Incremental synchronization engine.
//!
//! - [`SyncCursorStore`] - per-(symbol, data type) watermarks
//! - [`StalenessFilter`] - which pairs are due this run
//! - [`ExclusionTracker`] - symbols providers have no data for
//! - [`DiscoveryValidator`] - admission of newly listed symbols
//! - [`UpsertWriter`] - batched, idempotent persistence
//! - [`SyncOrchestrator`] - the run loop composing all of the above

mod cursor;
mod discovery;
mod exclusion;
mod orchestrator;
mod plan;
mod policy;
mod report;
mod staleness;
mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use cursor::*;
pub use discovery::*;
pub use exclusion::*;
pub use orchestrator::*;
pub use plan::*;
pub use policy::*;
pub use report::*;
pub use staleness::*;
pub use writer::*;
