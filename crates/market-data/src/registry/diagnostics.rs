//! Per-attempt outcome tracking for fallback diagnostics.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::errors::{FetchError, TransportKind};
use crate::models::{DataType, ProviderId};

/// What one provider call produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeKind {
    Success { records: usize },
    Empty,
    RateLimited,
    Error { transport: TransportKind },
}

impl OutcomeKind {
    pub fn from_error(error: &FetchError) -> Self {
        match error {
            FetchError::RateLimited { .. } => OutcomeKind::RateLimited,
            FetchError::Transport { kind, .. } => OutcomeKind::Error { transport: *kind },
            FetchError::Empty { .. } => OutcomeKind::Empty,
        }
    }

    /// Stable label for structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success { .. } => "success",
            OutcomeKind::Empty => "empty",
            OutcomeKind::RateLimited => "rate_limited",
            OutcomeKind::Error { .. } => "error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success { records } => write!(f, "SUCCESS({})", records),
            OutcomeKind::Empty => f.write_str("EMPTY"),
            OutcomeKind::RateLimited => f.write_str("RATE_LIMITED"),
            OutcomeKind::Error { transport } => write!(f, "ERROR({})", transport),
        }
    }
}

/// Ephemeral result of one fetch attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderOutcome {
    pub provider: ProviderId,
    pub symbol: String,
    pub data_type: DataType,
    pub kind: OutcomeKind,
    pub latency: Duration,
    pub message: Option<String>,
}

/// Ordered record of every provider tried during one resolution.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResolutionDiagnostics {
    pub attempts: Vec<ProviderOutcome>,
}

impl ResolutionDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: ProviderOutcome) {
        self.attempts.push(outcome);
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| format!("{}: {}", a.provider, a.kind))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| matches!(a.kind, OutcomeKind::Success { .. }))
    }

    /// True only if at least one provider was tried and every one was empty.
    pub fn all_empty(&self) -> bool {
        !self.attempts.is_empty() && self.attempts.iter().all(|a| a.kind == OutcomeKind::Empty)
    }

    pub fn providers_tried(&self) -> Vec<&ProviderId> {
        self.attempts.iter().map(|a| &a.provider).collect()
    }
}
