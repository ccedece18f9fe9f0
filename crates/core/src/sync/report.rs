//! Run statistics.
//!
//! A [`RunReport`] is a fold over the run's [`SyncEvent`] stream plus the
//! work-queue counts that never produce events (pairs skipped as fresh or
//! excluded). [`ReportingSink`] performs the fold while a run executes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use finsync_market_data::{DataType, OutcomeKind};
use serde::Serialize;
use tracing::{info, warn};

use super::cursor::AttemptOutcome;
use super::plan::RunPlan;
use crate::events::{SyncEvent, SyncEventSink};

/// Call counts for one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProviderTally {
    pub calls: usize,
    pub successes: usize,
    pub empty: usize,
    pub rate_limited: usize,
    pub errors: usize,
    pub records: usize,
}

/// Per-provider call counts keyed by provider id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats(BTreeMap<String, ProviderTally>);

impl ProviderStats {
    pub fn record(&mut self, provider: &str, outcome: OutcomeKind) {
        let tally = self.0.entry(provider.to_string()).or_default();
        tally.calls += 1;
        match outcome {
            OutcomeKind::Success { records } => {
                tally.successes += 1;
                tally.records += records;
            }
            OutcomeKind::Empty => tally.empty += 1,
            OutcomeKind::RateLimited => tally.rate_limited += 1,
            OutcomeKind::Error { .. } => tally.errors += 1,
        }
    }

    pub fn get(&self, provider: &str) -> Option<&ProviderTally> {
        self.0.get(provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProviderTally)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome counts for one data type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DataTypeTally {
    pub scheduled: usize,
    pub synced: usize,
    pub no_new_data: usize,
    pub empty: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub plan: RunPlan,
    pub discovered: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub readmitted: usize,
    pub newly_excluded: usize,
    /// Pairs that reached a terminal outcome this run.
    pub symbols_processed: usize,
    pub cursors_advanced: usize,
    pub records_written: usize,
    pub no_new_data: usize,
    pub empty: usize,
    pub failed: usize,
    pub persistence_failures: usize,
    pub skipped_fresh: usize,
    pub skipped_excluded: usize,
    pub by_data_type: BTreeMap<DataType, DataTypeTally>,
    pub provider_stats: ProviderStats,
    pub cancelled: bool,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(plan: RunPlan) -> Self {
        Self {
            plan,
            discovered: 0,
            admitted: 0,
            rejected: 0,
            readmitted: 0,
            newly_excluded: 0,
            symbols_processed: 0,
            cursors_advanced: 0,
            records_written: 0,
            no_new_data: 0,
            empty: 0,
            failed: 0,
            persistence_failures: 0,
            skipped_fresh: 0,
            skipped_excluded: 0,
            by_data_type: BTreeMap::new(),
            provider_stats: ProviderStats::default(),
            cancelled: false,
            timed_out: false,
            elapsed: Duration::ZERO,
        }
    }

    /// Rebuilds run statistics from an event stream.
    pub fn from_events<'a>(plan: RunPlan, events: impl IntoIterator<Item = &'a SyncEvent>) -> Self {
        let mut report = Self::new(plan);
        for event in events {
            report.apply(event);
        }
        report
    }

    pub fn apply(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::FetchAttempt {
                provider, outcome, ..
            } => self.provider_stats.record(provider, *outcome),
            SyncEvent::CursorAdvanced {
                data_type, records, ..
            } => {
                self.cursors_advanced += 1;
                self.symbols_processed += 1;
                self.records_written += records;
                self.tally(*data_type).synced += 1;
            }
            SyncEvent::AttemptRecorded {
                data_type, outcome, ..
            } => {
                self.symbols_processed += 1;
                let tally = self.tally(*data_type);
                match outcome {
                    AttemptOutcome::NoNewData => tally.no_new_data += 1,
                    AttemptOutcome::Empty => tally.empty += 1,
                    AttemptOutcome::Failure => tally.failed += 1,
                }
                match outcome {
                    AttemptOutcome::NoNewData => self.no_new_data += 1,
                    AttemptOutcome::Empty => self.empty += 1,
                    AttemptOutcome::Failure => self.failed += 1,
                }
            }
            SyncEvent::BatchFailed { submissions, .. } => {
                self.persistence_failures += submissions;
            }
            SyncEvent::BatchWritten { .. } => {}
            SyncEvent::SymbolDiscovered { .. } => self.discovered += 1,
            SyncEvent::SymbolAdmitted { .. } => self.admitted += 1,
            SyncEvent::SymbolRejected { .. } => self.rejected += 1,
            SyncEvent::SymbolExcluded { .. } => self.newly_excluded += 1,
            SyncEvent::SymbolReadmitted { .. } => self.readmitted += 1,
        }
    }

    /// Counts a pair that entered the work queue.
    pub fn record_scheduled(&mut self, data_type: DataType, count: usize) {
        self.tally(data_type).scheduled += count;
    }

    fn tally(&mut self, data_type: DataType) -> &mut DataTypeTally {
        self.by_data_type.entry(data_type).or_default()
    }

    pub fn log_summary(&self) {
        info!(
            target: "finsync::report",
            mode = %self.plan.mode,
            date = %self.plan.date,
            discovered = self.discovered,
            admitted = self.admitted,
            rejected = self.rejected,
            readmitted = self.readmitted,
            newly_excluded = self.newly_excluded,
            symbols_processed = self.symbols_processed,
            cursors_advanced = self.cursors_advanced,
            records_written = self.records_written,
            no_new_data = self.no_new_data,
            empty = self.empty,
            failed = self.failed,
            persistence_failures = self.persistence_failures,
            skipped_fresh = self.skipped_fresh,
            skipped_excluded = self.skipped_excluded,
            cancelled = self.cancelled,
            timed_out = self.timed_out,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "run summary"
        );
        for (data_type, tally) in &self.by_data_type {
            info!(
                target: "finsync::report",
                %data_type,
                scheduled = tally.scheduled,
                synced = tally.synced,
                no_new_data = tally.no_new_data,
                empty = tally.empty,
                failed = tally.failed,
                "data type summary"
            );
        }
        for (provider, tally) in self.provider_stats.iter() {
            info!(
                target: "finsync::report",
                %provider,
                calls = tally.calls,
                successes = tally.successes,
                empty = tally.empty,
                rate_limited = tally.rate_limited,
                errors = tally.errors,
                records = tally.records,
                "provider summary"
            );
        }
    }
}

/// Forwards events to another sink while folding them into a report.
pub struct ReportingSink {
    inner: Arc<dyn SyncEventSink>,
    report: Mutex<RunReport>,
}

impl ReportingSink {
    pub fn new(plan: RunPlan, inner: Arc<dyn SyncEventSink>) -> Self {
        Self {
            inner,
            report: Mutex::new(RunReport::new(plan)),
        }
    }

    pub fn snapshot(&self) -> RunReport {
        self.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut RunReport)) {
        f(&mut self.lock());
    }

    fn lock(&self) -> MutexGuard<'_, RunReport> {
        self.report.lock().unwrap_or_else(|poisoned| {
            warn!("Run report mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl SyncEventSink for ReportingSink {
    fn emit(&self, event: SyncEvent) {
        self.lock().apply(&event);
        self.inner.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MockEventSink;
    use crate::sync::plan::{DataTypeFilter, RunMode};
    use crate::sync::policy::SchedulePolicy;
    use crate::sync::ExclusionReason;
    use chrono::{NaiveDate, TimeZone, Utc};
    use finsync_market_data::TransportKind;

    fn plan() -> RunPlan {
        RunPlan::for_date(
            NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            RunMode::Sync(DataTypeFilter::All),
            &SchedulePolicy::default(),
        )
    }

    fn attempt(provider: &str, outcome: OutcomeKind) -> SyncEvent {
        SyncEvent::FetchAttempt {
            provider: provider.to_string(),
            symbol: "AAPL".to_string(),
            data_type: DataType::Price,
            outcome,
            latency_ms: 5,
        }
    }

    #[test]
    fn test_fold_counts_every_event_kind() {
        let events = vec![
            attempt("A", OutcomeKind::Empty),
            attempt("B", OutcomeKind::Success { records: 4 }),
            attempt("B", OutcomeKind::RateLimited),
            attempt(
                "A",
                OutcomeKind::Error {
                    transport: TransportKind::Timeout,
                },
            ),
            SyncEvent::CursorAdvanced {
                symbol: "AAPL".to_string(),
                data_type: DataType::Price,
                previous: None,
                watermark: Utc.with_ymd_and_hms(2024, 6, 7, 0, 0, 0).unwrap(),
                records: 4,
            },
            SyncEvent::AttemptRecorded {
                symbol: "MSFT".to_string(),
                data_type: DataType::Dividend,
                outcome: AttemptOutcome::NoNewData,
                consecutive_failures: 0,
                consecutive_empty: 0,
            },
            SyncEvent::symbol_excluded("XYZ", ExclusionReason::NoData(DataType::Price), true),
            SyncEvent::symbol_readmitted("OLD"),
            SyncEvent::BatchFailed {
                records: 3,
                submissions: 2,
                attempts: 4,
                error: "locked".to_string(),
            },
        ];

        let report = RunReport::from_events(plan(), &events);
        assert_eq!(report.cursors_advanced, 1);
        assert_eq!(report.records_written, 4);
        assert_eq!(report.no_new_data, 1);
        assert_eq!(report.symbols_processed, 2);
        assert_eq!(report.newly_excluded, 1);
        assert_eq!(report.readmitted, 1);
        assert_eq!(report.persistence_failures, 2);
        assert_eq!(report.by_data_type[&DataType::Price].synced, 1);
        assert_eq!(report.by_data_type[&DataType::Dividend].no_new_data, 1);

        let a = report.provider_stats.get("A").unwrap();
        assert_eq!((a.calls, a.empty, a.errors), (2, 1, 1));
        let b = report.provider_stats.get("B").unwrap();
        assert_eq!((b.calls, b.successes, b.rate_limited, b.records), (2, 1, 1, 4));
    }

    #[test]
    fn test_reporting_sink_forwards_and_folds() {
        let inner = MockEventSink::new();
        let sink = ReportingSink::new(plan(), Arc::new(inner.clone()));
        sink.emit(SyncEvent::symbol_readmitted("XYZ"));
        sink.update(|r| r.skipped_fresh = 7);

        assert_eq!(inner.len(), 1);
        let report = sink.snapshot();
        assert_eq!(report.readmitted, 1);
        assert_eq!(report.skipped_fresh, 7);
    }
}
