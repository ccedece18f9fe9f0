//! Provider trait definitions.

use async_trait::async_trait;

use crate::errors::FetchError;
use crate::models::{DiscoveredSymbol, FetchRequest, Record};

use super::capabilities::{ProviderCapabilities, RateLimit};

/// Uniform fetch contract for an external data provider.
///
/// Implementations must:
/// - map provider throttling signals (HTTP 429, quota messages) to
///   [`FetchError::RateLimited`]
/// - map "no data for this symbol" to [`FetchError::Empty`], never to a
///   transport error
/// - honor [`FetchRequest::effective_start`] for incremental fetches and
///   fall back to the lookback window when no cursor is given
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use finsync_market_data::provider::{ProviderClient, ProviderCapabilities, RateLimit};
///
/// struct MyProvider;
///
/// #[async_trait]
/// impl ProviderClient for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities {
///             data_types: &[DataType::Price],
///             supports_discovery: false,
///         }
///     }
///
///     async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
///         // ...
///     }
/// }
/// ```
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Unique identifier, a constant like "FINNHUB".
    ///
    /// Used for logging, rate limiter gates and priority configuration.
    fn id(&self) -> &'static str;

    /// Lower values are tried first. Default is 10.
    fn priority(&self) -> u8 {
        10
    }

    fn capabilities(&self) -> ProviderCapabilities;

    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    /// Fetch records for one symbol and data type.
    ///
    /// An answer without records should be reported as `Err(FetchError::Empty)`;
    /// the resolver also treats `Ok(vec![])` that way.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError>;
}

/// Source of candidate symbols for discovery sweeps.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Shares its rate limiter gate with the provider of the same id.
    fn id(&self) -> &'static str;

    async fn discover(&self) -> Result<Vec<DiscoveredSymbol>, FetchError>;
}
