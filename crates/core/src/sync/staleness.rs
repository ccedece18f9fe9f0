//! Staleness filtering.
//!
//! Decides which (symbol, data type) pairs are due for a fetch. Pairs whose
//! cursor is inside the data type's window are skipped without touching any
//! provider.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use finsync_market_data::{AssetKind, DataType};

use super::cursor::{CursorStore, DataTypeCursor, SyncCandidate};
use super::policy::StalenessPolicy;
use crate::errors::Result;
use crate::symbols::{tracks_data_type, AdmissionState};

/// A pair selected for fetching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub symbol: String,
    pub data_type: DataType,
    pub asset_kind: AssetKind,
    pub state: AdmissionState,
    pub cursor: Option<DataTypeCursor>,
}

/// Candidates split by staleness.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StalenessSelection {
    pub due: Vec<WorkItem>,
    pub fresh: usize,
    /// Candidates whose asset kind does not carry the data type.
    pub not_applicable: usize,
}

/// `true` when the pair was never synced or was last confirmed longer ago than `window`.
pub fn is_stale(cursor: Option<&DataTypeCursor>, now: DateTime<Utc>, window: Duration) -> bool {
    match cursor.and_then(DataTypeCursor::freshness) {
        None => true,
        Some(at) => now - at > window,
    }
}

pub struct StalenessFilter {
    cursors: Arc<dyn CursorStore>,
    policy: StalenessPolicy,
}

impl StalenessFilter {
    pub fn new(cursors: Arc<dyn CursorStore>, policy: StalenessPolicy) -> Self {
        Self { cursors, policy }
    }

    pub fn window(&self, data_type: DataType) -> Duration {
        self.policy.window(data_type)
    }

    /// Loads every candidate for `data_type` in one query and keeps the stale ones.
    pub fn select(
        &self,
        data_type: DataType,
        now: DateTime<Utc>,
        ignore_staleness: bool,
    ) -> Result<StalenessSelection> {
        let candidates = self.cursors.list_sync_candidates(data_type)?;
        Ok(self.filter(candidates, data_type, now, ignore_staleness))
    }

    pub fn filter(
        &self,
        candidates: Vec<SyncCandidate>,
        data_type: DataType,
        now: DateTime<Utc>,
        ignore_staleness: bool,
    ) -> StalenessSelection {
        let window = self.window(data_type);
        let mut selection = StalenessSelection::default();

        for candidate in candidates {
            if !tracks_data_type(candidate.asset_kind, data_type) {
                selection.not_applicable += 1;
                continue;
            }
            if !ignore_staleness && !is_stale(candidate.cursor.as_ref(), now, window) {
                selection.fresh += 1;
                continue;
            }
            selection.due.push(WorkItem {
                symbol: candidate.symbol,
                data_type,
                asset_kind: candidate.asset_kind,
                state: candidate.state,
                cursor: candidate.cursor,
            });
        }

        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::InMemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn candidate(symbol: &str, kind: AssetKind, synced_ago: Option<Duration>) -> SyncCandidate {
        let cursor = synced_ago.map(|ago| {
            let mut cursor = DataTypeCursor::new(symbol, DataType::Price);
            cursor.apply_advance(now() - ago, now() - ago);
            cursor
        });
        SyncCandidate {
            symbol: symbol.to_string(),
            asset_kind: kind,
            state: AdmissionState::Active,
            cursor,
        }
    }

    fn filter(policy: StalenessPolicy) -> StalenessFilter {
        StalenessFilter::new(Arc::new(InMemoryStore::new()), policy)
    }

    #[test]
    fn test_is_stale_boundaries() {
        let window = Duration::days(1);
        assert!(is_stale(None, now(), window));

        let mut cursor = DataTypeCursor::new("X", DataType::Price);
        cursor.apply_advance(now() - Duration::days(2), now());
        assert!(is_stale(Some(&cursor), now(), window));
        assert!(!is_stale(Some(&cursor), now(), Duration::days(3)));

        let never_synced = DataTypeCursor::new("X", DataType::Price);
        assert!(is_stale(Some(&never_synced), now(), window));
    }

    #[test]
    fn test_two_day_old_cursor_due_under_one_day_window_only() {
        let candidates = vec![candidate("X", AssetKind::Equity, Some(Duration::days(2)))];

        let one_day = filter(StalenessPolicy::default());
        let selection = one_day.filter(candidates.clone(), DataType::Price, now(), false);
        assert_eq!(selection.due.len(), 1);
        assert_eq!(selection.due[0].symbol, "X");

        let three_days =
            filter(StalenessPolicy::default().with_window(DataType::Price, Duration::days(3)));
        let selection = three_days.filter(candidates, DataType::Price, now(), false);
        assert!(selection.due.is_empty());
        assert_eq!(selection.fresh, 1);
    }

    #[test]
    fn test_recent_check_without_new_data_is_fresh() {
        let mut cursor = DataTypeCursor::new("DIVLESS", DataType::Dividend);
        cursor.apply_attempt(crate::sync::AttemptOutcome::Empty, now() - Duration::days(2));
        let candidates = vec![SyncCandidate {
            symbol: "DIVLESS".to_string(),
            asset_kind: AssetKind::Equity,
            state: AdmissionState::Active,
            cursor: Some(cursor),
        }];

        let selection =
            filter(StalenessPolicy::default()).filter(candidates, DataType::Dividend, now(), false);
        assert_eq!(selection.fresh, 1);
    }

    #[test]
    fn test_holdings_skip_non_etfs() {
        let candidates = vec![
            candidate("QQQ", AssetKind::Etf, None),
            candidate("AAPL", AssetKind::Equity, None),
        ];
        let selection =
            filter(StalenessPolicy::default()).filter(candidates, DataType::Holdings, now(), false);
        assert_eq!(selection.due.len(), 1);
        assert_eq!(selection.due[0].symbol, "QQQ");
        assert_eq!(selection.not_applicable, 1);
    }

    #[test]
    fn test_ignore_staleness_selects_fresh_pairs() {
        let candidates = vec![candidate("AAPL", AssetKind::Equity, Some(Duration::hours(1)))];
        let selection =
            filter(StalenessPolicy::default()).filter(candidates, DataType::Price, now(), true);
        assert_eq!(selection.due.len(), 1);
    }

    #[tokio::test]
    async fn test_select_reads_candidates_from_store() {
        let store = InMemoryStore::new();
        store.add_symbol("AAPL", AssetKind::Equity, AdmissionState::Active);
        store.add_symbol("NEWCO", AssetKind::Equity, AdmissionState::Pending);
        let filter = StalenessFilter::new(Arc::new(store), StalenessPolicy::default());

        let selection = filter.select(DataType::Price, now(), false).unwrap();
        let symbols: Vec<_> = selection.due.iter().map(|w| w.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL"]);
    }
}
