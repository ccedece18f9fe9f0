//! Source fallback across providers.
//!
//! For a request, providers that can serve its data type are tried in
//! priority order until one succeeds. Every provider-level failure is
//! absorbed here and surfaces as part of the returned [`Resolution`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{FetchError, TransportKind};
use crate::models::{DataType, FetchRequest, ProviderId, Record};
use crate::provider::ProviderClient;

use super::diagnostics::{OutcomeKind, ProviderOutcome, ResolutionDiagnostics};
use super::rate_limiter::{PermitOutcome, RateLimitConfig, RateLimiter};

/// Default bound on a single provider call.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminal result of resolving one (symbol, data type) request.
#[derive(Debug)]
pub enum Resolution {
    /// A provider returned records; later providers were not called.
    Success {
        provider: ProviderId,
        records: Vec<Record>,
        diagnostics: ResolutionDiagnostics,
    },
    /// Every provider configured for the data type answered `Empty`.
    AllSourcesEmpty { diagnostics: ResolutionDiagnostics },
    /// No success and at least one rate limit or transport error.
    Unavailable { diagnostics: ResolutionDiagnostics },
    /// The run was cancelled mid-chain.
    Cancelled { diagnostics: ResolutionDiagnostics },
    /// No provider serves this data type.
    NoProviders,
}

impl Resolution {
    pub fn diagnostics(&self) -> Option<&ResolutionDiagnostics> {
        match self {
            Resolution::Success { diagnostics, .. }
            | Resolution::AllSourcesEmpty { diagnostics }
            | Resolution::Unavailable { diagnostics }
            | Resolution::Cancelled { diagnostics } => Some(diagnostics),
            Resolution::NoProviders => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Resolution::Success { .. })
    }

    pub fn is_all_sources_empty(&self) -> bool {
        matches!(self, Resolution::AllSourcesEmpty { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Success { .. } => "success",
            Resolution::AllSourcesEmpty { .. } => "all_sources_empty",
            Resolution::Unavailable { .. } => "unavailable",
            Resolution::Cancelled { .. } => "cancelled",
            Resolution::NoProviders => "no_providers",
        }
    }
}

/// Orders providers per data type and executes the fallback chain.
pub struct SourceFallbackResolver {
    providers: Vec<Arc<dyn ProviderClient>>,
    priority_overrides: HashMap<DataType, Vec<String>>,
    rate_limiter: Arc<RateLimiter>,
    attempt_timeout: Duration,
}

impl SourceFallbackResolver {
    /// Build a resolver; each provider's [`RateLimit`](crate::provider::RateLimit)
    /// seeds its gate in `rate_limiter`.
    pub fn new(providers: Vec<Arc<dyn ProviderClient>>, rate_limiter: Arc<RateLimiter>) -> Self {
        let mut providers = providers;
        // Sort by priority (lower = higher priority); stable for equal priorities
        providers.sort_by_key(|p| p.priority());

        for provider in &providers {
            rate_limiter.configure(
                provider.id(),
                RateLimitConfig::from(&provider.rate_limit()),
            );
        }

        Self {
            providers,
            priority_overrides: HashMap::new(),
            rate_limiter,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Fix the provider order for one data type.
    ///
    /// Listed ids come first in the given order; unlisted capable providers
    /// follow by priority.
    pub fn with_priority(mut self, data_type: DataType, order: Vec<String>) -> Self {
        self.priority_overrides.insert(data_type, order);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn provider_ids(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Fallback chain for a data type.
    pub fn chain_for(&self, data_type: DataType) -> Vec<Arc<dyn ProviderClient>> {
        let mut chain: Vec<Arc<dyn ProviderClient>> = self
            .providers
            .iter()
            .filter(|p| p.capabilities().supports(data_type))
            .cloned()
            .collect();

        if let Some(order) = self.priority_overrides.get(&data_type) {
            let rank = |id: &str| {
                order
                    .iter()
                    .position(|o| o.eq_ignore_ascii_case(id))
                    .unwrap_or(usize::MAX)
            };
            chain.sort_by_key(|p| rank(p.id()));
        }

        chain
    }

    /// Resolve a request against the fallback chain.
    ///
    /// - `Success`: stop and return that provider's records
    /// - `RateLimited` / transport error: move on, not evidence of missing data
    /// - `Empty`: move on, recorded as evidence
    ///
    /// Records older than the request's effective start are dropped; a
    /// provider left with none counts as `Empty`.
    pub async fn resolve(&self, request: &FetchRequest, cancel: &CancellationToken) -> Resolution {
        let chain = self.chain_for(request.data_type);
        if chain.is_empty() {
            warn!("No providers available for data type: {}", request.data_type);
            return Resolution::NoProviders;
        }

        let start = request.effective_start(Utc::now());
        let mut diagnostics = ResolutionDiagnostics::new();

        for provider in chain {
            let provider_id: ProviderId = Cow::Borrowed(provider.id());

            let permit = match self.rate_limiter.acquire(provider.id(), cancel).await {
                Ok(permit) => permit,
                Err(e) => {
                    debug!("{}", e);
                    return Resolution::Cancelled { diagnostics };
                }
            };

            let started = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Resolution::Cancelled { diagnostics };
                }
                result = tokio::time::timeout(self.attempt_timeout, provider.fetch(request)) => {
                    result.unwrap_or_else(|_| {
                        Err(FetchError::transport(
                            provider.id(),
                            TransportKind::Timeout,
                            format!("no answer within {:?}", self.attempt_timeout),
                        ))
                    })
                }
            };
            let latency = started.elapsed();

            let result = result.and_then(|mut records| {
                records.retain(|r| r.watermark() >= start && r.symbol() == request.symbol);
                if records.is_empty() {
                    Err(FetchError::empty(provider.id(), &request.symbol))
                } else {
                    Ok(records)
                }
            });

            match result {
                Ok(records) => {
                    self.rate_limiter.release(permit, PermitOutcome::Success);
                    diagnostics.push(ProviderOutcome {
                        provider: provider_id.clone(),
                        symbol: request.symbol.clone(),
                        data_type: request.data_type,
                        kind: OutcomeKind::Success {
                            records: records.len(),
                        },
                        latency,
                        message: None,
                    });
                    debug!(
                        "Resolved {} {} via {}",
                        request.symbol,
                        request.data_type,
                        diagnostics.summary()
                    );
                    return Resolution::Success {
                        provider: provider_id,
                        records,
                        diagnostics,
                    };
                }
                Err(error) => {
                    self.rate_limiter.release(permit, error.permit_outcome());
                    if !error.is_empty() {
                        info!(
                            "Provider '{}' failed for {} {}: {}, trying next provider",
                            provider_id, request.symbol, request.data_type, error
                        );
                    }
                    diagnostics.push(ProviderOutcome {
                        provider: provider_id,
                        symbol: request.symbol.clone(),
                        data_type: request.data_type,
                        kind: OutcomeKind::from_error(&error),
                        latency,
                        message: Some(error.to_string()),
                    });
                }
            }
        }

        if diagnostics.all_empty() {
            debug!(
                "All sources empty for {} {}: {}",
                request.symbol,
                request.data_type,
                diagnostics.summary()
            );
            Resolution::AllSourcesEmpty { diagnostics }
        } else {
            Resolution::Unavailable { diagnostics }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceBar;
    use crate::provider::{ProviderCapabilities, RateLimit};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Script {
        Records,
        Stale,
        Empty,
        RateLimited,
        Transport,
        Hang,
    }

    struct MockProvider {
        id: &'static str,
        priority: u8,
        script: Script,
        data_types: &'static [DataType],
        call_count: AtomicUsize,
    }

    impl MockProvider {
        fn new(id: &'static str, priority: u8, script: Script) -> Arc<Self> {
            Arc::new(Self {
                id,
                priority,
                script,
                data_types: &[DataType::Price, DataType::Dividend],
                call_count: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    fn bar(symbol: &str, date: NaiveDate) -> Record {
        Record::Price(PriceBar {
            symbol: symbol.to_string(),
            date,
            open: None,
            high: None,
            low: None,
            close: dec!(10),
            adjusted_close: None,
            volume: None,
        })
    }

    #[async_trait]
    impl ProviderClient for MockProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                data_types: self.data_types,
                supports_discovery: false,
            }
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit {
                requests_per_minute: 60_000,
                initial_concurrency: 8,
                max_concurrency: 8,
            }
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let today = Utc::now().date_naive();
            match self.script {
                Script::Records => Ok(vec![bar(&request.symbol, today)]),
                Script::Stale => Ok(vec![bar(
                    &request.symbol,
                    today - ChronoDuration::days(400),
                )]),
                Script::Empty => Err(FetchError::empty(self.id, &request.symbol)),
                Script::RateLimited => Err(FetchError::rate_limited(self.id)),
                Script::Transport => Err(FetchError::transport(
                    self.id,
                    TransportKind::Server,
                    "HTTP 502",
                )),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn resolver(providers: Vec<Arc<MockProvider>>) -> SourceFallbackResolver {
        let providers: Vec<Arc<dyn ProviderClient>> = providers
            .into_iter()
            .map(|p| p as Arc<dyn ProviderClient>)
            .collect();
        SourceFallbackResolver::new(providers, Arc::new(RateLimiter::new()))
    }

    fn request() -> FetchRequest {
        FetchRequest::new("AAPL", DataType::Price, None, ChronoDuration::days(30))
    }

    #[tokio::test]
    async fn test_fallback_stops_at_first_success() {
        let a = MockProvider::new("A", 1, Script::Empty);
        let b = MockProvider::new("B", 2, Script::Records);
        let c = MockProvider::new("C", 3, Script::Records);
        let resolver = resolver(vec![c.clone(), a.clone(), b.clone()]);

        let resolution = resolver.resolve(&request(), &CancellationToken::new()).await;

        match resolution {
            Resolution::Success {
                provider,
                records,
                diagnostics,
            } => {
                assert_eq!(provider, "B");
                assert_eq!(records.len(), 1);
                assert_eq!(diagnostics.summary(), "A: EMPTY -> B: SUCCESS(1)");
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_empty_is_distinguished() {
        let a = MockProvider::new("A", 1, Script::Empty);
        let b = MockProvider::new("B", 2, Script::Empty);
        let resolver = resolver(vec![a, b]);

        let resolution = resolver.resolve(&request(), &CancellationToken::new()).await;
        assert!(resolution.is_all_sources_empty());
        assert_eq!(resolution.diagnostics().unwrap().attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_all_empty() {
        let a = MockProvider::new("A", 1, Script::Empty);
        let b = MockProvider::new("B", 2, Script::Transport);
        let resolver = resolver(vec![a, b]);

        let resolution = resolver.resolve(&request(), &CancellationToken::new()).await;
        assert!(matches!(resolution, Resolution::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_feeds_back_into_limiter() {
        let a = MockProvider::new("A", 1, Script::RateLimited);
        let b = MockProvider::new("B", 2, Script::Records);
        let resolver = resolver(vec![a.clone(), b]);

        let resolution = resolver.resolve(&request(), &CancellationToken::new()).await;
        assert!(resolution.is_success());
        assert_eq!(resolver.rate_limiter().snapshot("A").budget, 4);
        assert_eq!(resolver.rate_limiter().snapshot("A").consecutive_rate_limits, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_then_empty_is_unavailable() {
        let a = MockProvider::new("A", 1, Script::RateLimited);
        let b = MockProvider::new("B", 2, Script::Empty);
        let resolver = resolver(vec![a, b.clone()]);

        let resolution = resolver.resolve(&request(), &CancellationToken::new()).await;
        match resolution {
            Resolution::Unavailable { diagnostics } => {
                assert_eq!(diagnostics.attempts.len(), 2);
                assert!(!diagnostics.all_empty());
            }
            other => panic!("expected unavailable, got {:?}", other),
        }
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_records_before_window_count_as_empty() {
        let a = MockProvider::new("A", 1, Script::Stale);
        let resolver = resolver(vec![a]);

        let resolution = resolver.resolve(&request(), &CancellationToken::new()).await;
        assert!(resolution.is_all_sources_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transport_error() {
        let a = MockProvider::new("A", 1, Script::Hang);
        let resolver = resolver(vec![a]).with_attempt_timeout(Duration::from_secs(5));

        let resolution = resolver.resolve(&request(), &CancellationToken::new()).await;
        match resolution {
            Resolution::Unavailable { diagnostics } => assert_eq!(
                diagnostics.attempts[0].kind,
                OutcomeKind::Error {
                    transport: TransportKind::Timeout
                }
            ),
            other => panic!("expected unavailable, got {:?}", other),
        }
        assert_eq!(resolver.rate_limiter().snapshot("A").in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_in_flight_fetch() {
        let a = MockProvider::new("A", 1, Script::Hang);
        let b = MockProvider::new("B", 2, Script::Records);
        let resolver = resolver(vec![a, b.clone()]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let resolution = resolver.resolve(&request(), &cancel).await;
        assert!(matches!(resolution, Resolution::Cancelled { .. }));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_priority_override_and_capabilities() {
        let a = MockProvider::new("A", 1, Script::Records);
        let b = MockProvider::new("B", 2, Script::Records);
        let holdings_only = Arc::new(MockProvider {
            id: "H",
            priority: 0,
            script: Script::Records,
            data_types: &[DataType::Holdings],
            call_count: AtomicUsize::new(0),
        });
        let resolver = resolver(vec![a, b, holdings_only])
            .with_priority(DataType::Price, vec!["b".to_string()]);

        let ids: Vec<_> = resolver
            .chain_for(DataType::Price)
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(ids, vec!["B", "A"]);

        let ids: Vec<_> = resolver
            .chain_for(DataType::Dividend)
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);

        assert!(matches!(
            resolver
                .resolve(
                    &FetchRequest::new("AAPL", DataType::Split, None, ChronoDuration::days(30)),
                    &CancellationToken::new()
                )
                .await,
            Resolution::NoProviders
        ));
    }
}
