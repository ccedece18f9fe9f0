use chrono::{DateTime, Duration, Utc};

use super::DataType;

/// Options for a single fetch call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub symbol: String,
    pub data_type: DataType,
    /// Inclusive lower bound for incremental fetches (already one unit
    /// past the stored cursor). `None` means full history.
    pub since: Option<DateTime<Utc>>,
    pub force_full_refresh: bool,
    pub lookback_window: Duration,
}

impl FetchRequest {
    pub fn new(
        symbol: impl Into<String>,
        data_type: DataType,
        since: Option<DateTime<Utc>>,
        lookback_window: Duration,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            data_type,
            since,
            force_full_refresh: false,
            lookback_window,
        }
    }

    /// Request ignoring any cursor, bounded by `lookback_window`.
    pub fn full_history(
        symbol: impl Into<String>,
        data_type: DataType,
        lookback_window: Duration,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            data_type,
            since: None,
            force_full_refresh: true,
            lookback_window,
        }
    }

    pub fn is_full_history(&self) -> bool {
        self.force_full_refresh || self.since.is_none()
    }

    /// First instant the caller wants data for.
    pub fn effective_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.since {
            Some(since) if !self.force_full_refresh => since,
            _ => now - self.lookback_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_effective_start_uses_since_for_incremental() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let request = FetchRequest::new("AAPL", DataType::Price, Some(since), Duration::days(1825));
        assert!(!request.is_full_history());
        assert_eq!(request.effective_start(now), since);
    }

    #[test]
    fn test_effective_start_falls_back_to_lookback() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let request = FetchRequest::new("AAPL", DataType::Price, None, Duration::days(7));
        assert!(request.is_full_history());
        assert_eq!(request.effective_start(now), now - Duration::days(7));
    }

    #[test]
    fn test_force_full_refresh_ignores_since() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut request =
            FetchRequest::new("AAPL", DataType::Dividend, Some(since), Duration::days(365));
        request.force_full_refresh = true;
        assert_eq!(request.effective_start(now), now - Duration::days(365));
    }
}
