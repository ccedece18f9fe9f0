//! Sync events.
//!
//! Components emit a [`SyncEvent`] for every state transition worth
//! observing: fetch attempts, cursor advances, batch writes, admission and
//! exclusion changes. The default sink turns them into structured log lines;
//! tests swap in a collecting sink and assert on the stream.

mod sink;
mod sync_event;

pub use sink::*;
pub use sync_event::*;
