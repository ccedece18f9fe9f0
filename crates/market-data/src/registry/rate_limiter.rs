//! Adaptive per-provider rate limiter.
//!
//! Each provider gets a gate combining:
//! - a token bucket bounding the steady-state request rate
//! - a concurrency budget that halves on every rate-limit signal (floor 1)
//!   and grows one step after a run of consecutive successes
//! - a backoff window, `base_backoff * 2^consecutive_rate_limits` capped at
//!   `max_backoff`, during which no new permits are handed out
//!
//! The state is only ever mutated through [`RateLimiter::acquire`] and
//! [`RateLimiter::release`] (or by dropping a [`Permit`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::ProviderId;
use crate::provider::RateLimit;

/// Default bucket capacity (allows bursting).
const DEFAULT_BUCKET_CAPACITY: f64 = 10.0;

/// Upper bound on how long a waiter sleeps before re-checking its gate.
const SLOT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Token bucket for a single provider.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    /// Tokens per second.
    rate: f64,
    capacity: f64,
}

impl TokenBucket {
    fn with_config(requests_per_minute: u32, capacity: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: f64::from(requests_per_minute.max(1)) / 60.0,
            capacity,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Time until one token is available; zero if one is available now.
    fn time_until_available(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }

    fn take(&mut self) {
        self.tokens -= 1.0;
    }
}

/// Rate limiter configuration for a provider.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_capacity: f64,
    pub initial_budget: usize,
    pub max_budget: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&RateLimit::default())
    }
}

impl From<&RateLimit> for RateLimitConfig {
    fn from(limit: &RateLimit) -> Self {
        let max_budget = limit.max_concurrency.max(1);
        Self {
            requests_per_minute: limit.requests_per_minute,
            burst_capacity: DEFAULT_BUCKET_CAPACITY.min(f64::from(limit.requests_per_minute.max(1))),
            initial_budget: limit.initial_concurrency.clamp(1, max_budget),
            max_budget,
        }
    }
}

/// How the limiter reacts to outcomes. Shared by every provider gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdaptivePolicy {
    /// Consecutive successes needed before the budget grows.
    pub success_growth_threshold: u32,
    pub growth_step: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            success_growth_threshold: 10,
            growth_step: 1,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl AdaptivePolicy {
    /// `base_backoff * 2^events`, capped at `max_backoff`.
    pub fn backoff_for(&self, consecutive_rate_limits: u32) -> Duration {
        let factor = 2u32.checked_pow(consecutive_rate_limits).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Feedback passed back when a permit is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermitOutcome {
    Success,
    /// The provider answered without data. Counts as a success here.
    Empty,
    RateLimited,
    /// Transport failure. Breaks the success streak, leaves the budget alone.
    Failure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("Cancelled while waiting for a permit for {0}")]
    Cancelled(String),
}

/// Read-only view of one provider's limiter state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimiterSnapshot {
    pub budget: usize,
    pub max_budget: usize,
    pub in_flight: usize,
    pub consecutive_rate_limits: u32,
    pub consecutive_successes: u32,
    pub backoff_remaining: Duration,
}

/// Per-provider state, owned by its gate.
#[derive(Debug)]
struct RateLimiterState {
    budget: usize,
    max_budget: usize,
    in_flight: usize,
    consecutive_rate_limits: u32,
    consecutive_successes: u32,
    backoff_until: Option<Instant>,
    bucket: TokenBucket,
}

enum Admission {
    Granted,
    /// Backoff window or empty bucket.
    Delay(Duration),
    /// Budget exhausted; wait for a permit to come back.
    SlotBusy,
}

impl RateLimiterState {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            budget: config.initial_budget,
            max_budget: config.max_budget,
            in_flight: 0,
            consecutive_rate_limits: 0,
            consecutive_successes: 0,
            backoff_until: None,
            bucket: TokenBucket::with_config(config.requests_per_minute, config.burst_capacity),
        }
    }

    fn try_admit(&mut self, now: Instant) -> Admission {
        if let Some(until) = self.backoff_until {
            if now < until {
                return Admission::Delay(until - now);
            }
            self.backoff_until = None;
        }

        if self.in_flight >= self.budget {
            return Admission::SlotBusy;
        }

        let wait = self.bucket.time_until_available(now);
        if wait > Duration::ZERO {
            return Admission::Delay(wait);
        }

        self.bucket.take();
        self.in_flight += 1;
        Admission::Granted
    }

    /// Apply an outcome. Returns `(old_budget, backoff)` when the state transitioned.
    fn apply(
        &mut self,
        outcome: PermitOutcome,
        policy: &AdaptivePolicy,
        now: Instant,
    ) -> Option<(usize, Option<Duration>)> {
        let old_budget = self.budget;
        match outcome {
            PermitOutcome::RateLimited => {
                self.consecutive_successes = 0;
                self.consecutive_rate_limits = self.consecutive_rate_limits.saturating_add(1);
                self.budget = (self.budget / 2).max(1);
                let backoff = policy.backoff_for(self.consecutive_rate_limits);
                let until = now + backoff;
                // Never shorten a window already in force
                if self.backoff_until.map_or(true, |current| current < until) {
                    self.backoff_until = Some(until);
                }
                Some((old_budget, Some(backoff)))
            }
            PermitOutcome::Success | PermitOutcome::Empty => {
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                if self.consecutive_successes < policy.success_growth_threshold.max(1) {
                    return None;
                }
                self.consecutive_successes = 0;
                self.consecutive_rate_limits = 0;
                if self.budget < self.max_budget {
                    self.budget = (self.budget + policy.growth_step.max(1)).min(self.max_budget);
                    Some((old_budget, None))
                } else {
                    None
                }
            }
            PermitOutcome::Failure => {
                self.consecutive_successes = 0;
                None
            }
        }
    }

    fn snapshot(&self, now: Instant) -> RateLimiterSnapshot {
        RateLimiterSnapshot {
            budget: self.budget,
            max_budget: self.max_budget,
            in_flight: self.in_flight,
            consecutive_rate_limits: self.consecutive_rate_limits,
            consecutive_successes: self.consecutive_successes,
            backoff_remaining: self
                .backoff_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug)]
struct ProviderGate {
    provider: ProviderId,
    state: Mutex<RateLimiterState>,
    slot_freed: Notify,
}

impl ProviderGate {
    /// Lock the gate state, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is slightly off throttling.
    fn lock(&self) -> MutexGuard<'_, RateLimiterState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!(
                "Rate limiter state for '{}' was poisoned, recovering",
                self.provider
            );
            poisoned.into_inner()
        })
    }

    fn finish(&self, outcome: Option<PermitOutcome>, policy: &AdaptivePolicy) {
        let now = Instant::now();
        let (transition, budget, snapshot) = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            let transition = outcome.and_then(|o| state.apply(o, policy, now));
            (transition, state.budget, state.snapshot(now))
        };

        if let Some((old_budget, backoff)) = transition {
            info!(
                target: "finsync::rate_limiter",
                provider = %self.provider,
                old_budget,
                new_budget = budget,
                backoff_ms = backoff.map(|b| b.as_millis() as u64).unwrap_or(0),
                consecutive_rate_limits = snapshot.consecutive_rate_limits,
                "rate limiter transition"
            );
        }

        self.slot_freed.notify_one();
    }
}

/// Admission ticket for one provider call.
///
/// Dropping a permit without releasing it frees the slot without any
/// feedback (cancellation, timeouts).
#[derive(Debug)]
pub struct Permit {
    gate: Arc<ProviderGate>,
    policy: Arc<AdaptivePolicy>,
    released: bool,
}

impl Permit {
    pub fn provider(&self) -> &str {
        &self.gate.provider
    }

    fn complete(mut self, outcome: PermitOutcome) {
        self.released = true;
        self.gate.finish(Some(outcome), &self.policy);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.released {
            self.gate.finish(None, &self.policy);
        }
    }
}

/// Adaptive rate limiter for multiple providers.
///
/// Gates are created on demand from the provider's configuration (or
/// defaults) and shared by every worker calling that provider.
pub struct RateLimiter {
    gates: Mutex<HashMap<String, Arc<ProviderGate>>>,
    configs: Mutex<HashMap<String, RateLimitConfig>>,
    policy: Arc<AdaptivePolicy>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_policy(AdaptivePolicy::default())
    }

    pub fn with_policy(policy: AdaptivePolicy) -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    fn lock_gates(&self) -> MutexGuard<'_, HashMap<String, Arc<ProviderGate>>> {
        self.gates.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter gates mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_configs(&self) -> MutexGuard<'_, HashMap<String, RateLimitConfig>> {
        self.configs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter configs mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure limits for a provider. Resets any existing state.
    pub fn configure(&self, provider: &str, config: RateLimitConfig) {
        let mut configs = self.lock_configs();
        configs.insert(provider.to_string(), config);
        drop(configs); // Release configs lock before acquiring gates lock

        let mut gates = self.lock_gates();
        gates.remove(provider);
    }

    fn gate(&self, provider: &str) -> Arc<ProviderGate> {
        let mut gates = self.lock_gates();
        if let Some(gate) = gates.get(provider) {
            return Arc::clone(gate);
        }

        let config = self
            .lock_configs()
            .get(provider)
            .cloned()
            .unwrap_or_default();
        let gate = Arc::new(ProviderGate {
            provider: ProviderId::Owned(provider.to_string()),
            state: Mutex::new(RateLimiterState::new(&config)),
            slot_freed: Notify::new(),
        });
        gates.insert(provider.to_string(), Arc::clone(&gate));
        gate
    }

    /// Wait for a permit to call `provider`.
    ///
    /// Waits cooperatively on backoff windows, the token bucket and the
    /// concurrency budget. Fails only if `cancel` fires first.
    pub async fn acquire(
        &self,
        provider: &str,
        cancel: &CancellationToken,
    ) -> Result<Permit, AcquireError> {
        let gate = self.gate(provider);

        loop {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled(provider.to_string()));
            }

            let admission = gate.lock().try_admit(Instant::now());

            let wait = match admission {
                Admission::Granted => {
                    debug!("Rate limiter: granted permit for '{}'", provider);
                    return Ok(Permit {
                        gate,
                        policy: Arc::clone(&self.policy),
                        released: false,
                    });
                }
                Admission::Delay(wait) => {
                    debug!("Rate limiter: waiting {:?} for '{}'", wait, provider);
                    tokio::select! {
                        _ = cancel.cancelled() => None,
                        _ = tokio::time::sleep(wait) => Some(()),
                    }
                }
                Admission::SlotBusy => {
                    // notify_one keeps a wakeup for us if a slot frees before we poll
                    tokio::select! {
                        _ = cancel.cancelled() => None,
                        _ = gate.slot_freed.notified() => Some(()),
                        _ = tokio::time::sleep(SLOT_POLL_INTERVAL) => Some(()),
                    }
                }
            };

            if wait.is_none() {
                return Err(AcquireError::Cancelled(provider.to_string()));
            }
        }
    }

    /// Return a permit with the outcome of the call it admitted.
    pub fn release(&self, permit: Permit, outcome: PermitOutcome) {
        permit.complete(outcome);
    }

    pub fn snapshot(&self, provider: &str) -> RateLimiterSnapshot {
        let gate = self.gate(provider);
        let state = gate.lock();
        state.snapshot(Instant::now())
    }

    /// Reset a provider's state to its configuration.
    pub fn reset(&self, provider: &str) {
        let mut gates = self.lock_gates();
        gates.remove(provider);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
