//! Per-(symbol, data type) sync cursors.
//!
//! A cursor's `last_synced_at` is the latest watermark confirmed persisted.
//! It only moves forward, and only through [`SyncCursorStore::advance_cursor`],
//! which demands a [`WriteReceipt`] produced by a committed upsert batch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use finsync_market_data::{AssetKind, DataType, FetchRequest};
use serde::{Deserialize, Serialize};

use super::writer::WriteReceipt;
use crate::errors::Result;
use crate::events::{SyncEvent, SyncEventSink};
use crate::symbols::AdmissionState;

/// How a fetch ended when it did not advance the cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Providers were unreachable, rate limited, or the write failed.
    Failure,
    /// Every provider answered empty for a full-history request.
    Empty,
    /// Every provider answered empty for an incremental request.
    NoNewData,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Failure => "failure",
            AttemptOutcome::Empty => "empty",
            AttemptOutcome::NoNewData => "no_new_data",
        }
    }
}

/// Sync progress for one (symbol, data type) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTypeCursor {
    pub symbol: String,
    pub data_type: DataType,
    /// Latest watermark confirmed persisted. `None` until the first write.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Last time providers definitively answered with nothing new.
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub consecutive_failure_count: u32,
    pub consecutive_empty_count: u32,
}

impl DataTypeCursor {
    pub fn new(symbol: impl Into<String>, data_type: DataType) -> Self {
        Self {
            symbol: symbol.into(),
            data_type,
            last_synced_at: None,
            last_checked_at: None,
            last_attempt_at: None,
            consecutive_failure_count: 0,
            consecutive_empty_count: 0,
        }
    }

    pub fn has_synced(&self) -> bool {
        self.last_synced_at.is_some()
    }

    /// Most recent point the pair was known to be up to date.
    pub fn freshness(&self) -> Option<DateTime<Utc>> {
        match (self.last_synced_at, self.last_checked_at) {
            (Some(synced), Some(checked)) => Some(synced.max(checked)),
            (synced, checked) => synced.or(checked),
        }
    }

    /// Moves `last_synced_at` to `max(current, watermark)` and clears counters.
    ///
    /// Storage implementations must produce the same result.
    pub fn apply_advance(&mut self, watermark: DateTime<Utc>, attempted_at: DateTime<Utc>) {
        self.last_synced_at = Some(match self.last_synced_at {
            Some(current) => current.max(watermark),
            None => watermark,
        });
        self.last_attempt_at = Some(attempted_at);
        self.consecutive_failure_count = 0;
        self.consecutive_empty_count = 0;
    }

    /// Records an attempt that left `last_synced_at` untouched.
    pub fn apply_attempt(&mut self, outcome: AttemptOutcome, attempted_at: DateTime<Utc>) {
        self.last_attempt_at = Some(attempted_at);
        match outcome {
            AttemptOutcome::Failure => {
                self.consecutive_failure_count = self.consecutive_failure_count.saturating_add(1);
            }
            AttemptOutcome::Empty => {
                self.consecutive_empty_count = self.consecutive_empty_count.saturating_add(1);
                self.consecutive_failure_count = 0;
                self.last_checked_at = Some(attempted_at);
            }
            AttemptOutcome::NoNewData => {
                self.consecutive_failure_count = 0;
                self.last_checked_at = Some(attempted_at);
            }
        }
    }

    /// Forgets empty evidence so a re-admitted symbol is fetched as new.
    pub fn apply_readmission(&mut self) {
        self.consecutive_empty_count = 0;
        self.last_checked_at = None;
    }
}

/// A symbol eligible for syncing one data type, joined with its cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncCandidate {
    pub symbol: String,
    pub asset_kind: AssetKind,
    pub state: AdmissionState,
    pub cursor: Option<DataTypeCursor>,
}

/// Persistence contract for cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    fn get_cursor(&self, symbol: &str, data_type: DataType) -> Result<Option<DataTypeCursor>>;

    /// All cursors of one symbol.
    fn list_cursors(&self, symbol: &str) -> Result<Vec<DataTypeCursor>>;

    /// Every non-pending symbol with its cursor for `data_type`, in one query.
    fn list_sync_candidates(&self, data_type: DataType) -> Result<Vec<SyncCandidate>>;

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Applies [`DataTypeCursor::apply_advance`], creating the cursor if absent.
    async fn advance_cursor(
        &self,
        symbol: &str,
        data_type: DataType,
        watermark: DateTime<Utc>,
        attempted_at: DateTime<Utc>,
    ) -> Result<DataTypeCursor>;

    /// Applies [`DataTypeCursor::apply_attempt`], creating the cursor if absent.
    async fn record_attempt(
        &self,
        symbol: &str,
        data_type: DataType,
        outcome: AttemptOutcome,
        attempted_at: DateTime<Utc>,
    ) -> Result<DataTypeCursor>;

    /// Applies [`DataTypeCursor::apply_readmission`] to every cursor of `symbol`.
    async fn reset_for_readmission(&self, symbol: &str) -> Result<()>;
}

/// First instant an incremental fetch asks for: one time unit past the cursor.
pub fn next_fetch_since(cursor: Option<DateTime<Utc>>, data_type: DataType) -> Option<DateTime<Utc>> {
    cursor.map(|c| c + data_type.time_unit())
}

/// Builds the fetch request for a pair from its stored cursor.
pub fn fetch_request_for(
    symbol: &str,
    data_type: DataType,
    cursor: Option<&DataTypeCursor>,
    lookback: Duration,
    force_full_refresh: bool,
) -> FetchRequest {
    if force_full_refresh {
        return FetchRequest::full_history(symbol, data_type, lookback);
    }
    let since = next_fetch_since(cursor.and_then(|c| c.last_synced_at), data_type);
    FetchRequest::new(symbol, data_type, since, lookback)
}

/// Cursor access for the sync pipeline.
pub struct SyncCursorStore {
    store: Arc<dyn CursorStore>,
    events: Arc<dyn SyncEventSink>,
}

impl SyncCursorStore {
    pub fn new(store: Arc<dyn CursorStore>, events: Arc<dyn SyncEventSink>) -> Self {
        Self { store, events }
    }

    /// Latest persisted watermark, `None` if never synced.
    pub fn get_cursor(&self, symbol: &str, data_type: DataType) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .get_cursor(symbol, data_type)?
            .and_then(|c| c.last_synced_at))
    }

    /// Advances to the receipt's watermark. Never moves backwards.
    pub async fn advance_cursor(
        &self,
        receipt: &WriteReceipt,
        now: DateTime<Utc>,
    ) -> Result<DataTypeCursor> {
        let previous = self.get_cursor(receipt.symbol(), receipt.data_type())?;
        let cursor = self
            .store
            .advance_cursor(receipt.symbol(), receipt.data_type(), receipt.watermark(), now)
            .await?;
        self.events.emit(SyncEvent::CursorAdvanced {
            symbol: cursor.symbol.clone(),
            data_type: cursor.data_type,
            previous,
            watermark: cursor.last_synced_at.unwrap_or_else(|| receipt.watermark()),
            records: receipt.records(),
        });
        Ok(cursor)
    }

    pub async fn record_attempt(
        &self,
        symbol: &str,
        data_type: DataType,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<DataTypeCursor> {
        let cursor = self
            .store
            .record_attempt(symbol, data_type, outcome, now)
            .await?;
        self.events.emit(SyncEvent::AttemptRecorded {
            symbol: symbol.to_string(),
            data_type,
            outcome,
            consecutive_failures: cursor.consecutive_failure_count,
            consecutive_empty: cursor.consecutive_empty_count,
        });
        Ok(cursor)
    }

    pub fn store(&self) -> &Arc<dyn CursorStore> {
        &self.store
    }
}
