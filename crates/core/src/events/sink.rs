//! Sync event sink trait and implementations.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::SyncEvent;

/// Trait for receiving sync events.
///
/// # Design Rules
///
/// - `emit()` must be fast and non-blocking (no network calls, no DB writes)
/// - Failure to emit must not affect sync operations (best-effort)
pub trait SyncEventSink: Send + Sync {
    /// Emit a single sync event.
    fn emit(&self, event: SyncEvent);

    /// Emit multiple sync events.
    ///
    /// Default implementation calls `emit()` for each event.
    fn emit_batch(&self, events: Vec<SyncEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Writes every event as a structured `tracing` record.
#[derive(Clone, Default)]
pub struct TracingEventSink;

impl SyncEventSink for TracingEventSink {
    fn emit(&self, event: SyncEvent) {
        let kind = event.kind();
        match event {
            SyncEvent::FetchAttempt {
                provider,
                symbol,
                data_type,
                outcome,
                latency_ms,
            } => debug!(
                target: "finsync::events",
                event = kind,
                %provider,
                %symbol,
                %data_type,
                outcome = outcome.as_str(),
                latency_ms,
                "fetch attempt"
            ),
            SyncEvent::CursorAdvanced {
                symbol,
                data_type,
                previous,
                watermark,
                records,
            } => debug!(
                target: "finsync::events",
                event = kind,
                %symbol,
                %data_type,
                previous = ?previous,
                %watermark,
                records,
                "cursor advanced"
            ),
            SyncEvent::AttemptRecorded {
                symbol,
                data_type,
                outcome,
                consecutive_failures,
                consecutive_empty,
            } => debug!(
                target: "finsync::events",
                event = kind,
                %symbol,
                %data_type,
                outcome = outcome.as_str(),
                consecutive_failures,
                consecutive_empty,
                "attempt recorded"
            ),
            SyncEvent::BatchWritten {
                records,
                submissions,
                attempts,
            } => debug!(
                target: "finsync::events",
                event = kind,
                records,
                submissions,
                attempts,
                "batch written"
            ),
            SyncEvent::BatchFailed {
                records,
                submissions,
                attempts,
                error,
            } => warn!(
                target: "finsync::events",
                event = kind,
                records,
                submissions,
                attempts,
                %error,
                "batch failed"
            ),
            SyncEvent::SymbolDiscovered { symbol, source } => debug!(
                target: "finsync::events",
                event = kind,
                %symbol,
                %source,
                "symbol discovered"
            ),
            SyncEvent::SymbolAdmitted { symbol, via } => info!(
                target: "finsync::events",
                event = kind,
                %symbol,
                via = %via,
                "symbol admitted"
            ),
            SyncEvent::SymbolRejected { symbol } => info!(
                target: "finsync::events",
                event = kind,
                %symbol,
                "symbol rejected"
            ),
            SyncEvent::SymbolExcluded {
                symbol,
                reason,
                auto_excluded,
            } => info!(
                target: "finsync::events",
                event = kind,
                %symbol,
                reason = reason.as_str(),
                auto_excluded,
                "symbol excluded"
            ),
            SyncEvent::SymbolReadmitted { symbol } => info!(
                target: "finsync::events",
                event = kind,
                %symbol,
                "symbol readmitted"
            ),
        }
    }
}

/// No-op implementation for contexts that don't need events.
#[derive(Clone, Default)]
pub struct NoOpEventSink;

impl SyncEventSink for NoOpEventSink {
    fn emit(&self, _event: SyncEvent) {}
}

/// Collects emitted events for later inspection.
#[derive(Clone, Default)]
pub struct MockEventSink {
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl MockEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// Returns the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    /// Returns true if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns events matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&SyncEvent) -> bool) -> Vec<SyncEvent> {
        self.events().into_iter().filter(|e| predicate(e)).collect()
    }
}

impl SyncEventSink for MockEventSink {
    fn emit(&self, event: SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_sink_does_not_panic() {
        let sink = NoOpEventSink;
        sink.emit(SyncEvent::symbol_readmitted("AAPL"));
        sink.emit_batch(vec![
            SyncEvent::symbol_readmitted("MSFT"),
            SyncEvent::symbol_readmitted("GOOG"),
        ]);
    }

    #[test]
    fn test_tracing_sink_handles_every_variant() {
        let sink = TracingEventSink;
        sink.emit(SyncEvent::symbol_readmitted("AAPL"));
        sink.emit(SyncEvent::BatchFailed {
            records: 10,
            submissions: 2,
            attempts: 3,
            error: "disk full".to_string(),
        });
    }

    #[test]
    fn test_mock_sink_collects_events() {
        let sink = MockEventSink::new();
        assert!(sink.is_empty());

        sink.emit(SyncEvent::symbol_readmitted("AAPL"));
        assert_eq!(sink.len(), 1);

        sink.emit_batch(vec![
            SyncEvent::symbol_readmitted("MSFT"),
            SyncEvent::SymbolRejected {
                symbol: "GOOG".to_string(),
            },
        ]);
        assert_eq!(sink.len(), 3);
        assert_eq!(
            sink.filter(|e| matches!(e, SyncEvent::SymbolReadmitted { .. }))
                .len(),
            2
        );

        sink.clear();
        assert!(sink.is_empty());
    }
}
