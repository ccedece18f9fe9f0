//! Symbol exclusion.
//!
//! A symbol is excluded when providers have definitively and repeatedly
//! answered that no data exists for it. Transport failures and rate limits
//! never count: only all-sources-empty answers to full-history requests do.
//! An excluded symbol is skipped before any provider is called.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use finsync_market_data::DataType;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::cursor::{AttemptOutcome, SyncCursorStore};
use super::policy::ExclusionPolicy;
use crate::errors::{Result, ValidationError};
use crate::events::{SyncEvent, SyncEventSink};
use crate::symbols::{AdmissionState, SymbolStore};

/// Why a symbol was excluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ExclusionReason {
    /// A critical data type came back empty from every provider.
    NoData(DataType),
    /// Every tracked data type came back empty and none was ever synced.
    NoDataAnyType,
    /// Discovery validation found neither recent prices nor dividends.
    ValidationFailed,
    /// Excluded by an operator. Never re-validated automatically.
    Manual,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::NoData(DataType::Price) => "no_price_data",
            ExclusionReason::NoData(DataType::Dividend) => "no_dividend_data",
            ExclusionReason::NoData(DataType::Holdings) => "no_holdings_data",
            ExclusionReason::NoData(DataType::Split) => "no_split_data",
            ExclusionReason::NoData(DataType::Intraday) => "no_intraday_data",
            ExclusionReason::NoDataAnyType => "no_data_any_type",
            ExclusionReason::ValidationFailed => "validation_failed",
            ExclusionReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExclusionReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "no_data_any_type" => return Ok(ExclusionReason::NoDataAnyType),
            "validation_failed" => return Ok(ExclusionReason::ValidationFailed),
            "manual" => return Ok(ExclusionReason::Manual),
            _ => {}
        }
        s.strip_prefix("no_")
            .and_then(|rest| rest.strip_suffix("_data"))
            .and_then(|dt| dt.parse::<DataType>().ok())
            .map(ExclusionReason::NoData)
            .ok_or_else(|| {
                ValidationError::InvalidInput(format!("unknown exclusion reason '{}'", s))
            })
    }
}

impl From<ExclusionReason> for String {
    fn from(reason: ExclusionReason) -> Self {
        reason.as_str().to_string()
    }
}

impl TryFrom<String> for ExclusionReason {
    type Error = ValidationError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Persisted exclusion of one symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionRecord {
    pub symbol: String,
    pub reason: ExclusionReason,
    /// `false` for operator exclusions.
    pub auto_excluded: bool,
    pub validation_attempts: u32,
    pub excluded_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl ExclusionRecord {
    pub fn new(symbol: impl Into<String>, reason: ExclusionReason, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            reason,
            auto_excluded: reason != ExclusionReason::Manual,
            validation_attempts: 0,
            excluded_at: now,
            last_validated_at: None,
        }
    }
}

/// Persistence contract for exclusion records.
#[async_trait]
pub trait ExclusionStore: Send + Sync {
    fn get_exclusion(&self, symbol: &str) -> Result<Option<ExclusionRecord>>;

    fn list_exclusions(&self) -> Result<Vec<ExclusionRecord>>;

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Inserts `record` unless the symbol already has one. Returns whether it was inserted.
    async fn create_exclusion(&self, record: ExclusionRecord) -> Result<bool>;

    async fn update_exclusion(&self, record: ExclusionRecord) -> Result<()>;

    /// Returns whether a record was deleted.
    async fn delete_exclusion(&self, symbol: &str) -> Result<bool>;
}

/// What an all-sources-empty observation led to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExclusionDecision {
    Excluded(ExclusionReason),
    AlreadyExcluded,
    /// Evidence recorded, threshold not reached.
    Counted { consecutive_empty: u32 },
}

pub struct ExclusionTracker {
    exclusions: Arc<dyn ExclusionStore>,
    symbols: Arc<dyn SymbolStore>,
    cursors: Arc<SyncCursorStore>,
    policy: ExclusionPolicy,
    events: Arc<dyn SyncEventSink>,
}

impl ExclusionTracker {
    pub fn new(
        exclusions: Arc<dyn ExclusionStore>,
        symbols: Arc<dyn SymbolStore>,
        cursors: Arc<SyncCursorStore>,
        policy: ExclusionPolicy,
        events: Arc<dyn SyncEventSink>,
    ) -> Self {
        Self {
            exclusions,
            symbols,
            cursors,
            policy,
            events,
        }
    }

    /// Records that every provider answered empty to a full-history request.
    ///
    /// `tracked` lists the data types synced for the symbol; when all of them
    /// are empty and none ever synced the symbol is excluded regardless of
    /// which types are critical.
    pub async fn record_all_sources_empty(
        &self,
        symbol: &str,
        data_type: DataType,
        tracked: &[DataType],
        now: DateTime<Utc>,
    ) -> Result<ExclusionDecision> {
        let cursor = self
            .cursors
            .record_attempt(symbol, data_type, AttemptOutcome::Empty, now)
            .await?;

        if self.is_excluded(symbol)? {
            return Ok(ExclusionDecision::AlreadyExcluded);
        }

        if self.policy.is_critical(data_type)
            && cursor.consecutive_empty_count >= self.policy.threshold
        {
            let reason = ExclusionReason::NoData(data_type);
            self.exclude(symbol, reason, now).await?;
            return Ok(ExclusionDecision::Excluded(reason));
        }

        if !tracked.is_empty() {
            let cursors = self.cursors.store().list_cursors(symbol)?;
            let all_empty = tracked.iter().all(|dt| {
                cursors.iter().any(|c| {
                    c.data_type == *dt
                        && !c.has_synced()
                        && c.consecutive_empty_count >= self.policy.threshold
                })
            });
            if all_empty {
                let reason = ExclusionReason::NoDataAnyType;
                self.exclude(symbol, reason, now).await?;
                return Ok(ExclusionDecision::Excluded(reason));
            }
        }

        Ok(ExclusionDecision::Counted {
            consecutive_empty: cursor.consecutive_empty_count,
        })
    }

    /// Creates an exclusion record and moves the symbol to `Excluded`.
    ///
    /// Returns `false` if the symbol was already excluded.
    pub async fn exclude(
        &self,
        symbol: &str,
        reason: ExclusionReason,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut record = ExclusionRecord::new(symbol, reason, now);
        if reason == ExclusionReason::ValidationFailed {
            record.validation_attempts = 1;
            record.last_validated_at = Some(now);
        }
        let created = self.exclusions.create_exclusion(record).await?;
        self.symbols
            .set_state(symbol, AdmissionState::Excluded)
            .await?;
        if created {
            info!("Excluded {} ({})", symbol, reason);
            self.events.emit(SyncEvent::symbol_excluded(
                symbol,
                reason,
                reason != ExclusionReason::Manual,
            ));
        }
        Ok(created)
    }

    pub fn is_excluded(&self, symbol: &str) -> Result<bool> {
        Ok(self.exclusions.get_exclusion(symbol)?.is_some())
    }

    pub fn excluded_symbols(&self) -> Result<HashSet<String>> {
        Ok(self
            .exclusions
            .list_exclusions()?
            .into_iter()
            .map(|r| r.symbol)
            .collect())
    }

    pub fn list(&self) -> Result<Vec<ExclusionRecord>> {
        self.exclusions.list_exclusions()
    }

    /// Re-admits symbols left in `Excluded` without an exclusion record.
    pub async fn readmit_orphans(&self) -> Result<Vec<String>> {
        let excluded = self.excluded_symbols()?;
        let mut readmitted = Vec::new();
        for symbol in self.symbols.list_by_state(AdmissionState::Excluded)? {
            if excluded.contains(&symbol.symbol) {
                continue;
            }
            self.readmit(&symbol.symbol).await?;
            readmitted.push(symbol.symbol);
        }
        Ok(readmitted)
    }

    /// Activates a symbol and forgets its empty evidence.
    pub async fn readmit(&self, symbol: &str) -> Result<()> {
        self.symbols.set_state(symbol, AdmissionState::Active).await?;
        self.cursors.store().reset_for_readmission(symbol).await?;
        info!("Re-admitted {}", symbol);
        self.events.emit(SyncEvent::symbol_readmitted(symbol));
        Ok(())
    }

    /// Deletes the exclusion record. The symbol is re-admitted by the next run.
    pub async fn remove(&self, symbol: &str) -> Result<bool> {
        self.exclusions.delete_exclusion(symbol).await
    }

    pub(crate) fn exclusion_store(&self) -> &Arc<dyn ExclusionStore> {
        &self.exclusions
    }
}
