//! Sync event types.

use chrono::{DateTime, Utc};
use finsync_market_data::{DataType, OutcomeKind, ResolutionDiagnostics};
use serde::Serialize;

use crate::sync::{AttemptOutcome, ExclusionReason};

/// Facts emitted by the engine while a run progresses.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// One provider call finished.
    FetchAttempt {
        provider: String,
        symbol: String,
        data_type: DataType,
        outcome: OutcomeKind,
        latency_ms: u64,
    },

    /// Records were persisted and the cursor moved forward.
    CursorAdvanced {
        symbol: String,
        data_type: DataType,
        previous: Option<DateTime<Utc>>,
        watermark: DateTime<Utc>,
        records: usize,
    },

    /// A fetch finished without advancing the cursor.
    AttemptRecorded {
        symbol: String,
        data_type: DataType,
        outcome: AttemptOutcome,
        consecutive_failures: u32,
        consecutive_empty: u32,
    },

    /// A batch committed.
    BatchWritten {
        records: usize,
        submissions: usize,
        attempts: u32,
    },

    /// A batch failed after all retries. No cursor in it advances.
    BatchFailed {
        records: usize,
        submissions: usize,
        attempts: u32,
        error: String,
    },

    SymbolDiscovered {
        symbol: String,
        source: String,
    },

    SymbolAdmitted {
        symbol: String,
        via: DataType,
    },

    SymbolRejected {
        symbol: String,
    },

    SymbolExcluded {
        symbol: String,
        reason: ExclusionReason,
        auto_excluded: bool,
    },

    SymbolReadmitted {
        symbol: String,
    },
}

impl SyncEvent {
    /// One `FetchAttempt` per provider call recorded in `diagnostics`.
    pub fn fetch_attempts(diagnostics: &ResolutionDiagnostics) -> Vec<SyncEvent> {
        diagnostics
            .attempts
            .iter()
            .map(|attempt| SyncEvent::FetchAttempt {
                provider: attempt.provider.to_string(),
                symbol: attempt.symbol.clone(),
                data_type: attempt.data_type,
                outcome: attempt.kind,
                latency_ms: attempt.latency.as_millis() as u64,
            })
            .collect()
    }

    pub fn symbol_excluded(symbol: &str, reason: ExclusionReason, auto_excluded: bool) -> Self {
        SyncEvent::SymbolExcluded {
            symbol: symbol.to_string(),
            reason,
            auto_excluded,
        }
    }

    pub fn symbol_readmitted(symbol: &str) -> Self {
        SyncEvent::SymbolReadmitted {
            symbol: symbol.to_string(),
        }
    }

    /// Stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::FetchAttempt { .. } => "fetch_attempt",
            SyncEvent::CursorAdvanced { .. } => "cursor_advanced",
            SyncEvent::AttemptRecorded { .. } => "attempt_recorded",
            SyncEvent::BatchWritten { .. } => "batch_written",
            SyncEvent::BatchFailed { .. } => "batch_failed",
            SyncEvent::SymbolDiscovered { .. } => "symbol_discovered",
            SyncEvent::SymbolAdmitted { .. } => "symbol_admitted",
            SyncEvent::SymbolRejected { .. } => "symbol_rejected",
            SyncEvent::SymbolExcluded { .. } => "symbol_excluded",
            SyncEvent::SymbolReadmitted { .. } => "symbol_readmitted",
        }
    }
}
