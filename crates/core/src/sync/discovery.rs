//! Discovery and admission of new symbols.
//!
//! Discovery sweeps the configured sources for symbols not yet tracked and
//! registers them as `pending`. Validation then decides, with real provider
//! calls through the shared resolver and rate limiter, whether a pending
//! symbol is worth syncing at all.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use finsync_market_data::{
    DataType, DiscoveredSymbol, DiscoverySource, FetchRequest, PermitOutcome, Resolution,
    SourceFallbackResolver,
};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::exclusion::{ExclusionReason, ExclusionTracker};
use super::policy::DiscoveryPolicy;
use crate::errors::Result;
use crate::events::{SyncEvent, SyncEventSink};
use crate::symbols::{AdmissionState, NewSymbol, SymbolStore};

/// Verdict of the admission predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// A provider returned recent data of `via`.
    Admitted { via: DataType, provider: String },
    /// Both checks came back empty from every provider.
    Rejected,
    /// No conclusive answer; try again later.
    Deferred,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub sources_swept: usize,
    pub source_failures: usize,
    pub found: usize,
    pub duplicates: usize,
    pub already_tracked: usize,
    pub inserted: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub admitted: usize,
    pub rejected: usize,
    pub deferred: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReclassifySummary {
    pub checked: usize,
    pub readmitted: usize,
    pub still_excluded: usize,
    pub deferred: usize,
    pub skipped_manual: usize,
}

/// Keeps the first sighting of each symbol. Returns the survivors and the
/// number of duplicates dropped.
pub fn dedupe(found: Vec<DiscoveredSymbol>) -> (Vec<DiscoveredSymbol>, usize) {
    let mut seen = HashSet::new();
    let total = found.len();
    let unique: Vec<_> = found
        .into_iter()
        .filter(|s| seen.insert(s.symbol.clone()))
        .collect();
    let duplicates = total - unique.len();
    (unique, duplicates)
}

pub struct DiscoveryValidator {
    resolver: Arc<SourceFallbackResolver>,
    sources: Vec<Arc<dyn DiscoverySource>>,
    symbols: Arc<dyn SymbolStore>,
    tracker: Arc<ExclusionTracker>,
    policy: DiscoveryPolicy,
    events: Arc<dyn SyncEventSink>,
}

impl DiscoveryValidator {
    pub fn new(
        resolver: Arc<SourceFallbackResolver>,
        sources: Vec<Arc<dyn DiscoverySource>>,
        symbols: Arc<dyn SymbolStore>,
        tracker: Arc<ExclusionTracker>,
        policy: DiscoveryPolicy,
        events: Arc<dyn SyncEventSink>,
    ) -> Self {
        Self {
            resolver,
            sources,
            symbols,
            tracker,
            policy,
            events,
        }
    }

    /// Sweeps every source and registers unseen symbols as `pending`.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<DiscoverySummary> {
        let mut summary = DiscoverySummary::default();
        let mut found = Vec::new();
        let limiter = self.resolver.rate_limiter();

        for source in &self.sources {
            let permit = match limiter.acquire(source.id(), cancel).await {
                Ok(permit) => permit,
                Err(e) => {
                    debug!("Discovery stopped: {}", e);
                    break;
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = source.discover() => result,
            };

            match result {
                Ok(symbols) => {
                    limiter.release(permit, PermitOutcome::Success);
                    info!("Discovery source '{}' listed {} symbols", source.id(), symbols.len());
                    summary.sources_swept += 1;
                    found.extend(symbols);
                }
                Err(e) => {
                    limiter.release(permit, e.permit_outcome());
                    warn!("Discovery source '{}' failed: {}", source.id(), e);
                    summary.source_failures += 1;
                }
            }
        }

        summary.found = found.len();
        let (unique, duplicates) = dedupe(found);
        summary.duplicates = duplicates;

        let codes: Vec<String> = unique.iter().map(|s| s.symbol.clone()).collect();
        let tracked = self.symbols.get_symbols(&codes)?;
        summary.already_tracked = tracked.len();

        let new_symbols: Vec<NewSymbol> = unique
            .into_iter()
            .filter(|s| !tracked.contains_key(&s.symbol))
            .map(NewSymbol::from)
            .collect();

        for new_symbol in &new_symbols {
            self.events.emit(SyncEvent::SymbolDiscovered {
                symbol: new_symbol.symbol.clone(),
                source: new_symbol.discovery_source.clone().unwrap_or_default(),
            });
        }
        summary.inserted = self.symbols.insert_pending(new_symbols).await?;

        info!(
            "Discovery: {} listed, {} duplicates, {} already tracked, {} new",
            summary.found, summary.duplicates, summary.already_tracked, summary.inserted
        );
        Ok(summary)
    }

    /// Admission predicate: recent prices, or else recent dividends.
    pub async fn validate_symbol(&self, symbol: &str, cancel: &CancellationToken) -> ValidationOutcome {
        let price = FetchRequest::full_history(symbol, DataType::Price, self.policy.price_window);
        let price_resolution = self.resolve(&price, cancel).await;
        let price_empty = match &price_resolution {
            Resolution::Success { provider, .. } => {
                return ValidationOutcome::Admitted {
                    via: DataType::Price,
                    provider: provider.to_string(),
                }
            }
            Resolution::Cancelled { .. } => return ValidationOutcome::Deferred,
            Resolution::AllSourcesEmpty { .. } => true,
            Resolution::Unavailable { .. } | Resolution::NoProviders => false,
        };

        let dividend =
            FetchRequest::full_history(symbol, DataType::Dividend, self.policy.dividend_window);
        match self.resolve(&dividend, cancel).await {
            Resolution::Success { provider, .. } => ValidationOutcome::Admitted {
                via: DataType::Dividend,
                provider: provider.to_string(),
            },
            Resolution::AllSourcesEmpty { .. } if price_empty => ValidationOutcome::Rejected,
            _ => ValidationOutcome::Deferred,
        }
    }

    /// Validates every `pending` symbol.
    pub async fn validate_pending(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<ValidationSummary> {
        let pending = self.symbols.list_by_state(AdmissionState::Pending)?;
        if pending.is_empty() {
            return Ok(ValidationSummary::default());
        }
        info!("Validating {} pending symbols", pending.len());

        let mut summary = ValidationSummary::default();
        let mut verdicts = stream::iter(pending)
            .map(|symbol| async move {
                let outcome = self.validate_symbol(&symbol.symbol, cancel).await;
                (symbol.symbol, outcome)
            })
            .buffer_unordered(self.policy.validation_concurrency);

        while let Some((symbol, outcome)) = verdicts.next().await {
            match outcome {
                ValidationOutcome::Admitted { via, provider } => {
                    self.symbols.set_state(&symbol, AdmissionState::Active).await?;
                    debug!("Admitted {} via {} from {}", symbol, via, provider);
                    self.events.emit(SyncEvent::SymbolAdmitted { symbol, via });
                    summary.admitted += 1;
                }
                ValidationOutcome::Rejected => {
                    self.tracker
                        .exclude(&symbol, ExclusionReason::ValidationFailed, now)
                        .await?;
                    self.events.emit(SyncEvent::SymbolRejected { symbol });
                    summary.rejected += 1;
                }
                ValidationOutcome::Deferred => summary.deferred += 1,
            }
        }

        info!(
            "Validation: {} admitted, {} rejected, {} deferred",
            summary.admitted, summary.rejected, summary.deferred
        );
        Ok(summary)
    }

    /// Re-runs the admission predicate for every automatic exclusion.
    pub async fn revalidate_exclusions(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<ReclassifySummary> {
        let mut summary = ReclassifySummary::default();
        let mut candidates = Vec::new();
        for record in self.tracker.list()? {
            if record.auto_excluded {
                candidates.push(record);
            } else {
                summary.skipped_manual += 1;
            }
        }

        let mut verdicts = stream::iter(candidates)
            .map(|record| async move {
                let outcome = self.validate_symbol(&record.symbol, cancel).await;
                (record, outcome)
            })
            .buffer_unordered(self.policy.validation_concurrency);

        while let Some((mut record, outcome)) = verdicts.next().await {
            summary.checked += 1;
            match outcome {
                ValidationOutcome::Admitted { .. } => {
                    self.tracker.remove(&record.symbol).await?;
                    self.tracker.readmit(&record.symbol).await?;
                    summary.readmitted += 1;
                }
                ValidationOutcome::Rejected => {
                    record.validation_attempts = record.validation_attempts.saturating_add(1);
                    record.last_validated_at = Some(now);
                    record.reason = reclassified_reason(record.reason);
                    self.tracker.exclusion_store().update_exclusion(record).await?;
                    summary.still_excluded += 1;
                }
                ValidationOutcome::Deferred => summary.deferred += 1,
            }
        }

        info!(
            "Reclassification: {} checked, {} re-admitted, {} still excluded, {} deferred",
            summary.checked, summary.readmitted, summary.still_excluded, summary.deferred
        );
        Ok(summary)
    }

    async fn resolve(&self, request: &FetchRequest, cancel: &CancellationToken) -> Resolution {
        let resolution = self.resolver.resolve(request, cancel).await;
        if let Some(diagnostics) = resolution.diagnostics() {
            self.events.emit_batch(SyncEvent::fetch_attempts(diagnostics));
        }
        resolution
    }
}

/// Reason left on an exclusion whose re-validation found neither recent
/// prices nor recent dividends.
///
/// Reasons that evidence confirms are kept. A reason about some other data
/// type is not confirmed by it and becomes `ValidationFailed`.
fn reclassified_reason(previous: ExclusionReason) -> ExclusionReason {
    match previous {
        ExclusionReason::NoData(DataType::Price | DataType::Dividend)
        | ExclusionReason::NoDataAnyType
        | ExclusionReason::ValidationFailed
        | ExclusionReason::Manual => previous,
        ExclusionReason::NoData(_) => ExclusionReason::ValidationFailed,
    }
}
