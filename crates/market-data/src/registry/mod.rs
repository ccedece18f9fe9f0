//! Provider orchestration: adaptive rate limiting and source fallback.

mod diagnostics;
mod rate_limiter;
mod resolver;

pub use diagnostics::{OutcomeKind, ProviderOutcome, ResolutionDiagnostics};
pub use rate_limiter::{
    AcquireError, AdaptivePolicy, Permit, PermitOutcome, RateLimitConfig, RateLimiter,
    RateLimiterSnapshot,
};
pub use resolver::{Resolution, SourceFallbackResolver, DEFAULT_ATTEMPT_TIMEOUT};
