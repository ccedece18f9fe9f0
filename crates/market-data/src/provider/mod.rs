//! Provider abstractions and implementations.
//!
//! This module contains:
//! - The `ProviderClient` trait every data adapter implements
//! - The `DiscoverySource` trait for broad symbol discovery sweeps
//! - Provider capabilities and rate limiting configuration
//! - Concrete adapters (Alpha Vantage, Finnhub)
//!
//! Adapters are stateless apart from their HTTP client; throttling and
//! fallback are handled by the registry, never inside an adapter.

mod capabilities;
mod traits;

pub mod alpha_vantage;
pub mod finnhub;

pub use capabilities::{ProviderCapabilities, RateLimit};
pub use traits::{DiscoverySource, ProviderClient};
