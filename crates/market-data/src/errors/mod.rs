//! Canonical provider error taxonomy.
//!
//! Every adapter maps its provider-specific failure signals onto
//! [`FetchError`], which the resolver inspects as a value:
//!
//! - [`FetchError::RateLimited`]: the provider throttled us (HTTP 429, quota notes)
//! - [`FetchError::Transport`]: network, timeout, 5xx, unreadable payloads
//! - [`FetchError::Empty`]: the provider answered but has no data for the symbol
//!
//! Only `Empty` ever counts as evidence that a symbol is dead.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::PermitOutcome;

/// Sub-classification of transport failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Timeout,
    Network,
    /// Non-success HTTP status other than 429.
    Server,
    /// Payload could not be parsed.
    Decode,
    /// Missing, invalid or under-privileged API key.
    Unauthorized,
    /// Provider answered with an error message of its own.
    Provider,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Timeout => "timeout",
            TransportKind::Network => "network",
            TransportKind::Server => "server",
            TransportKind::Decode => "decode",
            TransportKind::Unauthorized => "unauthorized",
            TransportKind::Provider => "provider",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Rate limited: {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Transport error ({kind}): {provider} - {message}")]
    Transport {
        provider: String,
        kind: TransportKind,
        message: String,
    },

    #[error("No data: {provider} has nothing for {symbol}")]
    Empty { provider: String, symbol: String },
}

impl FetchError {
    pub fn rate_limited(provider: &str) -> Self {
        Self::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    }

    pub fn transport(provider: &str, kind: TransportKind, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.to_string(),
            kind,
            message: message.into(),
        }
    }

    pub fn empty(provider: &str, symbol: &str) -> Self {
        Self::Empty {
            provider: provider.to_string(),
            symbol: symbol.to_string(),
        }
    }

    pub fn decode(provider: &str, err: impl fmt::Display) -> Self {
        Self::transport(
            provider,
            TransportKind::Decode,
            format!("Failed to parse response: {}", err),
        )
    }

    /// Map a `reqwest` failure onto the transport taxonomy.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_decode() {
            TransportKind::Decode
        } else {
            TransportKind::Network
        };
        Self::transport(provider, kind, err.to_string())
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::RateLimited { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Empty { provider, .. } => provider,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Feedback handed to the rate limiter when the permit is released.
    pub fn permit_outcome(&self) -> PermitOutcome {
        match self {
            Self::RateLimited { .. } => PermitOutcome::RateLimited,
            Self::Transport { .. } => PermitOutcome::Failure,
            // The provider answered; for throttling purposes that is a success.
            Self::Empty { .. } => PermitOutcome::Empty,
        }
    }
}
