//! Run-level control loop.
//!
//! ```text
//! Discover -> Validate -> ReclassifyExclusions
//!          -> BuildWorkQueue (stale and not excluded, per data type)
//!          -> Dispatch (one bounded pool per data type, all concurrent)
//!          -> Persist (UpsertWriter) -> AdvanceCursors / RecordExclusions
//!          -> Report
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use finsync_market_data::{
    AssetKind, DataType, DiscoverySource, Resolution, SourceFallbackResolver,
};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cursor::{fetch_request_for, AttemptOutcome, CursorStore, SyncCursorStore};
use super::discovery::DiscoveryValidator;
use super::exclusion::{ExclusionStore, ExclusionTracker};
use super::plan::{Phase, RunPlan};
use super::policy::SyncPolicy;
use super::report::{ReportingSink, RunReport};
use super::staleness::{StalenessFilter, WorkItem};
use super::writer::{RecordStore, UpsertWriter};
use crate::errors::{Error, Result};
use crate::events::{SyncEvent, SyncEventSink};
use crate::symbols::{tracks_data_type, SymbolStore};

/// The four durable interfaces the engine reads and writes.
#[derive(Clone)]
pub struct SyncStores {
    pub symbols: Arc<dyn SymbolStore>,
    pub cursors: Arc<dyn CursorStore>,
    pub exclusions: Arc<dyn ExclusionStore>,
    pub records: Arc<dyn RecordStore>,
}

impl SyncStores {
    /// Uses one backend for every interface.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: SymbolStore + CursorStore + ExclusionStore + RecordStore + 'static,
    {
        Self {
            symbols: store.clone(),
            cursors: store.clone(),
            exclusions: store.clone(),
            records: store,
        }
    }
}

/// Terminal state of one work item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ItemOutcome {
    /// Records queued; the cursor follows once the batch commits.
    Submitted,
    NoNewData,
    Empty,
    Failed,
    Cancelled,
    NoProviders,
}

/// Cursor updates waiting on their batch commit.
///
/// Workers hand these off so they can fetch the next item while the writer
/// fills its batch.
#[derive(Default)]
struct PendingCommits {
    tasks: Mutex<JoinSet<Result<()>>>,
}

impl PendingCommits {
    fn push<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| {
            warn!("Pending commit set lock poisoned, recovering");
            poisoned.into_inner()
        });
        tasks.spawn(task);
    }

    /// Waits for every queued cursor update. Call after the writer shut down.
    async fn drain(&self) -> Result<()> {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| Error::Unexpected(format!("cursor update task failed: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                error!("Cursor update failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Components wired to one run's reporting sink and cancellation token.
struct RunContext<'a> {
    plan: &'a RunPlan,
    cancel: CancellationToken,
    sink: Arc<ReportingSink>,
    cursors: Arc<SyncCursorStore>,
    tracker: Arc<ExclusionTracker>,
    validator: DiscoveryValidator,
    staleness: StalenessFilter,
}

pub struct SyncOrchestrator {
    resolver: Arc<SourceFallbackResolver>,
    sources: Vec<Arc<dyn DiscoverySource>>,
    stores: SyncStores,
    policy: SyncPolicy,
    events: Arc<dyn SyncEventSink>,
}

impl SyncOrchestrator {
    pub fn new(
        resolver: Arc<SourceFallbackResolver>,
        sources: Vec<Arc<dyn DiscoverySource>>,
        stores: SyncStores,
        policy: SyncPolicy,
        events: Arc<dyn SyncEventSink>,
    ) -> Self {
        Self {
            resolver,
            sources,
            stores,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Tracker for operator commands outside a run.
    pub fn exclusion_tracker(&self) -> ExclusionTracker {
        let cursors = Arc::new(SyncCursorStore::new(
            self.stores.cursors.clone(),
            self.events.clone(),
        ));
        ExclusionTracker::new(
            self.stores.exclusions.clone(),
            self.stores.symbols.clone(),
            cursors,
            self.policy.exclusion.clone(),
            self.events.clone(),
        )
    }

    /// Executes `plan`.
    ///
    /// Returns `Err` only for store and configuration failures. Cancellation
    /// and run timeout end the run early with a partial report.
    pub async fn run(&self, plan: &RunPlan, cancel: &CancellationToken) -> Result<RunReport> {
        self.policy.validate()?;

        let started = Instant::now();
        let run_cancel = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = self.policy.run_timeout.map(|limit| {
            let token = run_cancel.clone();
            let flag = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        warn!("Run timeout of {:?} reached, cancelling", limit);
                        flag.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        info!(
            "Starting {} run for {} (phases: {:?}, data types: {:?}, full refresh: {})",
            plan.mode, plan.date, plan.phases, plan.data_types, plan.force_full_refresh
        );

        let ctx = self.context(plan, run_cancel.clone());
        let outcome = self.execute(&ctx).await;

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Err(e) = outcome {
            error!("Run aborted: {}", e);
            return Err(e);
        }

        let mut report = ctx.sink.snapshot();
        report.timed_out = timed_out.load(Ordering::SeqCst);
        report.cancelled = cancel.is_cancelled() || report.timed_out;
        report.elapsed = started.elapsed();
        report.log_summary();
        Ok(report)
    }

    fn context<'a>(&self, plan: &'a RunPlan, cancel: CancellationToken) -> RunContext<'a> {
        let sink = Arc::new(ReportingSink::new(plan.clone(), self.events.clone()));
        let events: Arc<dyn SyncEventSink> = sink.clone();
        let cursors = Arc::new(SyncCursorStore::new(self.stores.cursors.clone(), events.clone()));
        let tracker = Arc::new(ExclusionTracker::new(
            self.stores.exclusions.clone(),
            self.stores.symbols.clone(),
            cursors.clone(),
            self.policy.exclusion.clone(),
            events.clone(),
        ));
        let validator = DiscoveryValidator::new(
            self.resolver.clone(),
            self.sources.clone(),
            self.stores.symbols.clone(),
            tracker.clone(),
            self.policy.discovery.clone(),
            events,
        );
        let staleness = StalenessFilter::new(self.stores.cursors.clone(), self.policy.staleness.clone());

        RunContext {
            plan,
            cancel,
            sink,
            cursors,
            tracker,
            validator,
            staleness,
        }
    }

    async fn execute(&self, ctx: &RunContext<'_>) -> Result<()> {
        let now = Utc::now();

        if ctx.plan.includes(Phase::Discover) {
            ctx.validator.discover(&ctx.cancel).await?;
        }
        if ctx.plan.includes(Phase::Validate) && !ctx.cancel.is_cancelled() {
            ctx.validator.validate_pending(&ctx.cancel, now).await?;
        }
        if ctx.plan.includes(Phase::ReclassifyExclusions) && !ctx.cancel.is_cancelled() {
            ctx.validator.revalidate_exclusions(&ctx.cancel, now).await?;
        }
        if ctx.plan.includes(Phase::Sync) && !ctx.cancel.is_cancelled() {
            self.sync(ctx, now).await?;
        }
        Ok(())
    }

    async fn sync(&self, ctx: &RunContext<'_>, now: DateTime<Utc>) -> Result<()> {
        let readmitted = ctx.tracker.readmit_orphans().await?;
        if !readmitted.is_empty() {
            info!("Re-admitted {} symbols without exclusion records", readmitted.len());
        }
        let excluded = ctx.tracker.excluded_symbols()?;

        let mut queues = Vec::with_capacity(ctx.plan.data_types.len());
        for &data_type in &ctx.plan.data_types {
            let selection = ctx
                .staleness
                .select(data_type, now, ctx.plan.force_full_refresh)?;
            let fresh = selection.fresh;
            let (work, skipped): (Vec<WorkItem>, Vec<WorkItem>) = selection
                .due
                .into_iter()
                .partition(|item| !excluded.contains(&item.symbol));

            info!(
                "{}: {} due, {} fresh, {} excluded",
                data_type,
                work.len(),
                fresh,
                skipped.len()
            );
            ctx.sink.update(|report| {
                report.skipped_fresh += fresh;
                report.skipped_excluded += skipped.len();
                report.record_scheduled(data_type, work.len());
            });
            queues.push((data_type, work));
        }

        let (writer, writer_handle) = UpsertWriter::spawn(
            self.stores.records.clone(),
            self.policy.writer.clone(),
            ctx.sink.clone(),
        );

        let commits = PendingCommits::default();
        let pools = queues
            .into_iter()
            .map(|(data_type, items)| self.run_pool(ctx, &writer, &commits, data_type, items));
        let results = join_all(pools).await;

        drop(writer);
        let stats = writer_handle.shutdown().await;
        debug!(
            "Writer finished: {} batches, {} failed, {} records, {} retries",
            stats.batches_written, stats.batches_failed, stats.records_written, stats.retries
        );
        let committed = commits.drain().await;

        results.into_iter().collect::<Result<Vec<()>>>()?;
        committed
    }

    async fn run_pool(
        &self,
        ctx: &RunContext<'_>,
        writer: &UpsertWriter,
        commits: &PendingCommits,
        data_type: DataType,
        items: Vec<WorkItem>,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let width = self.policy.workers_for(data_type);
        debug!("{} pool: {} items, {} workers", data_type, items.len(), width);

        let mut outcomes = stream::iter(items)
            .map(|item| self.process(ctx, writer, commits, item))
            .buffer_unordered(width);

        let mut first_error = None;
        let mut cancelled = 0usize;
        while let Some(result) = outcomes.next().await {
            match result {
                Ok(ItemOutcome::Cancelled) => cancelled += 1,
                Ok(_) => {}
                Err(e) => {
                    if first_error.is_none() {
                        error!("{} pool stopping on store error: {}", data_type, e);
                        ctx.cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }
        if cancelled > 0 {
            info!("{} pool: {} items not attempted (cancelled)", data_type, cancelled);
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn process(
        &self,
        ctx: &RunContext<'_>,
        writer: &UpsertWriter,
        commits: &PendingCommits,
        item: WorkItem,
    ) -> Result<ItemOutcome> {
        if ctx.cancel.is_cancelled() {
            return Ok(ItemOutcome::Cancelled);
        }

        let request = fetch_request_for(
            &item.symbol,
            item.data_type,
            item.cursor.as_ref(),
            self.policy.lookback,
            ctx.plan.force_full_refresh,
        );
        let resolution = self.resolver.resolve(&request, &ctx.cancel).await;
        if let Some(diagnostics) = resolution.diagnostics() {
            ctx.sink.emit_batch(SyncEvent::fetch_attempts(diagnostics));
        }

        match resolution {
            Resolution::Success { records, .. } => {
                let pending = match writer.submit(&item.symbol, item.data_type, records).await {
                    Ok(pending) => pending,
                    Err(e) if !e.is_fatal() => {
                        warn!("Could not queue {} {}: {}", item.symbol, item.data_type, e);
                        ctx.cursors
                            .record_attempt(&item.symbol, item.data_type, AttemptOutcome::Failure, Utc::now())
                            .await?;
                        return Ok(ItemOutcome::Failed);
                    }
                    Err(e) => return Err(e),
                };
                let cursors = ctx.cursors.clone();
                commits.push(async move {
                    match pending.committed().await {
                        Ok(receipt) => {
                            cursors.advance_cursor(&receipt, Utc::now()).await?;
                            Ok(())
                        }
                        Err(e) if !e.is_fatal() => {
                            warn!(
                                "Write failed for {} {}, cursor left unchanged: {}",
                                item.symbol, item.data_type, e
                            );
                            cursors
                                .record_attempt(&item.symbol, item.data_type, AttemptOutcome::Failure, Utc::now())
                                .await?;
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                });
                Ok(ItemOutcome::Submitted)
            }
            Resolution::AllSourcesEmpty { .. } if request.is_full_history() => {
                let tracked = self.tracked_types(item.asset_kind);
                ctx.tracker
                    .record_all_sources_empty(&item.symbol, item.data_type, &tracked, Utc::now())
                    .await?;
                Ok(ItemOutcome::Empty)
            }
            Resolution::AllSourcesEmpty { .. } => {
                ctx.cursors
                    .record_attempt(&item.symbol, item.data_type, AttemptOutcome::NoNewData, Utc::now())
                    .await?;
                Ok(ItemOutcome::NoNewData)
            }
            Resolution::Unavailable { diagnostics } => {
                debug!(
                    "{} {} unavailable: {}",
                    item.symbol,
                    item.data_type,
                    diagnostics.summary()
                );
                ctx.cursors
                    .record_attempt(&item.symbol, item.data_type, AttemptOutcome::Failure, Utc::now())
                    .await?;
                Ok(ItemOutcome::Failed)
            }
            Resolution::Cancelled { .. } => Ok(ItemOutcome::Cancelled),
            Resolution::NoProviders => Ok(ItemOutcome::NoProviders),
        }
    }

    /// Data types a symbol of `kind` is synced for.
    fn tracked_types(&self, kind: AssetKind) -> Vec<DataType> {
        self.policy
            .schedule
            .data_types
            .iter()
            .copied()
            .filter(|dt| tracks_data_type(kind, *dt))
            .collect()
    }
}
