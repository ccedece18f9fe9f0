//! Provider capabilities and rate limiting configuration.

use crate::models::DataType;

/// Describes what a provider can serve.
///
/// The resolver only puts a provider in a data type's fallback chain if
/// that data type is listed here.
#[derive(Clone, Debug)]
pub struct ProviderCapabilities {
    /// Data types this provider can fetch.
    pub data_types: &'static [DataType],

    /// Whether the provider can list candidate symbols.
    pub supports_discovery: bool,
}

impl ProviderCapabilities {
    pub fn supports(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }
}

/// Rate limiting configuration for a provider.
///
/// Seeds the adaptive limiter: the concurrency budget starts at
/// `initial_concurrency` and never grows past `max_concurrency`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum requests allowed per minute.
    pub requests_per_minute: u32,

    /// Concurrency budget at startup.
    pub initial_concurrency: usize,

    /// Ceiling for the adaptive concurrency budget.
    pub max_concurrency: usize,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            initial_concurrency: 4,
            max_concurrency: 8,
        }
    }
}
