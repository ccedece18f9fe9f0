//! finsync market data crate
//!
//! Provider-facing half of the synchronization engine: everything needed
//! to ask unreliable, rate-limited external providers for time-series data
//! and get back a single, classified answer.
//!
//! # Architecture
//!
//! ```text
//!   FetchRequest (symbol, data type, since, lookback)
//!          |
//!          v
//! +--------------------------+
//! |  SourceFallbackResolver  |  priority order per data type
//! +--------------------------+
//!          |   acquire / release(outcome)
//!          v
//! +--------------------------+
//! |       RateLimiter        |  token bucket + adaptive budget + backoff
//! +--------------------------+
//!          |
//!          v
//! +--------------------------+
//! |  ProviderClient (xN)     |  Alpha Vantage, Finnhub, ...
//! +--------------------------+
//!          |
//!          v
//!   Resolution: Success | AllSourcesEmpty | Unavailable | Cancelled
//! ```
//!
//! # Core Types
//!
//! - [`DataType`] - price, dividend, holdings, split, intraday
//! - [`Record`] - typed record with natural key and watermark
//! - [`FetchRequest`] - typed options for one fetch call
//! - [`FetchError`] - `RateLimited | Transport | Empty`
//! - [`Resolution`] - outcome of a fallback chain

pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

pub use errors::{FetchError, TransportKind};
pub use models::{
    AssetKind, DataType, DiscoveredSymbol, DividendEvent, FetchRequest, HoldingEntry,
    IntradayBar, PriceBar, ProviderId, Record, SplitEvent, SymbolCode,
};
pub use provider::alpha_vantage::AlphaVantageProvider;
pub use provider::finnhub::FinnhubProvider;
pub use provider::{DiscoverySource, ProviderCapabilities, ProviderClient, RateLimit};
pub use registry::{
    AcquireError, AdaptivePolicy, OutcomeKind, Permit, PermitOutcome, ProviderOutcome,
    RateLimiter, RateLimiterSnapshot, Resolution, ResolutionDiagnostics,
    SourceFallbackResolver,
};

// Re-exported so callers share the same cancellation type.
pub use tokio_util::sync::CancellationToken;
