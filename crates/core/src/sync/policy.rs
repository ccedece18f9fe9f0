//! Tunable engine policy.
//!
//! Every knob has a default matching the constants module; the CLI layers
//! environment overrides on top.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration as StdDuration;

use chrono::{Duration, Weekday};
use finsync_market_data::DataType;

use crate::constants::*;
use crate::errors::{Error, Result};

/// Per-data-type staleness windows.
#[derive(Clone, Debug, PartialEq)]
pub struct StalenessPolicy {
    windows: HashMap<DataType, Duration>,
}

impl StalenessPolicy {
    pub fn window(&self, data_type: DataType) -> Duration {
        self.windows
            .get(&data_type)
            .copied()
            .unwrap_or_else(|| Duration::days(PRICE_STALENESS_DAYS))
    }

    pub fn with_window(mut self, data_type: DataType, window: Duration) -> Self {
        self.windows.insert(data_type, window);
        self
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        let windows = HashMap::from([
            (DataType::Price, Duration::days(PRICE_STALENESS_DAYS)),
            (DataType::Intraday, Duration::days(INTRADAY_STALENESS_DAYS)),
            (DataType::Dividend, Duration::days(DIVIDEND_STALENESS_DAYS)),
            (DataType::Split, Duration::days(SPLIT_STALENESS_DAYS)),
            (DataType::Holdings, Duration::days(HOLDINGS_STALENESS_DAYS)),
        ]);
        Self { windows }
    }
}

/// When all-sources-empty evidence turns into an exclusion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExclusionPolicy {
    /// Consecutive full-history empties on a critical data type before exclusion.
    pub threshold: u32,
    /// Data types whose absence alone excludes a symbol.
    pub critical_data_types: BTreeSet<DataType>,
}

impl ExclusionPolicy {
    pub fn is_critical(&self, data_type: DataType) -> bool {
        self.critical_data_types.contains(&data_type)
    }
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_EXCLUSION_THRESHOLD,
            critical_data_types: BTreeSet::from([DataType::Price]),
        }
    }
}

/// Windows used to decide whether a discovered symbol is real.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    pub price_window: Duration,
    pub dividend_window: Duration,
    pub validation_concurrency: usize,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            price_window: Duration::days(VALIDATION_PRICE_WINDOW_DAYS),
            dividend_window: Duration::days(VALIDATION_DIVIDEND_WINDOW_DAYS),
            validation_concurrency: DEFAULT_VALIDATION_CONCURRENCY,
        }
    }
}

/// Upsert writer batching and retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterPolicy {
    pub batch_size: usize,
    pub flush_interval: StdDuration,
    /// Retries after the first attempt of a batch.
    pub max_retries: u32,
    pub retry_delay: StdDuration,
}

impl Default for WriterPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_WRITE_BATCH_SIZE,
            flush_interval: StdDuration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            max_retries: DEFAULT_WRITE_MAX_RETRIES,
            retry_delay: StdDuration::from_millis(DEFAULT_WRITE_RETRY_DELAY_MS),
        }
    }
}

/// Which extra phases a scheduled run picks up on a given date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub discovery_weekday: Weekday,
    pub reclassify_day_of_month: u32,
    /// Data types synced by scheduled and unfiltered runs.
    pub data_types: Vec<DataType>,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            discovery_weekday: weekday_from_index(DEFAULT_DISCOVERY_WEEKDAY),
            reclassify_day_of_month: DEFAULT_RECLASSIFY_DAY_OF_MONTH,
            data_types: DataType::ALL.to_vec(),
        }
    }
}

/// 0 = Monday .. 6 = Sunday; out-of-range values wrap.
pub fn weekday_from_index(index: u32) -> Weekday {
    match index % 7 {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncPolicy {
    /// How far back a full-history fetch reaches.
    pub lookback: Duration,
    pub staleness: StalenessPolicy,
    pub exclusion: ExclusionPolicy,
    pub discovery: DiscoveryPolicy,
    pub writer: WriterPolicy,
    pub schedule: SchedulePolicy,
    pub default_workers: usize,
    pub workers: HashMap<DataType, usize>,
    /// Wall-clock bound on a run; expiry behaves like cancellation.
    pub run_timeout: Option<StdDuration>,
}

impl SyncPolicy {
    pub fn workers_for(&self, data_type: DataType) -> usize {
        self.workers
            .get(&data_type)
            .copied()
            .unwrap_or(self.default_workers)
            .max(1)
    }

    pub fn with_workers(mut self, data_type: DataType, workers: usize) -> Self {
        self.workers.insert(data_type, workers);
        self
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.lookback <= Duration::zero() {
            return Err(Error::InvalidConfigValue(
                "lookback must be positive".to_string(),
            ));
        }
        if self.default_workers == 0 || self.workers.values().any(|w| *w == 0) {
            return Err(Error::InvalidConfigValue(
                "worker pool width must be at least 1".to_string(),
            ));
        }
        if self.writer.batch_size == 0 {
            return Err(Error::InvalidConfigValue(
                "write batch size must be at least 1".to_string(),
            ));
        }
        if self.exclusion.threshold == 0 {
            return Err(Error::InvalidConfigValue(
                "exclusion threshold must be at least 1".to_string(),
            ));
        }
        if self.discovery.validation_concurrency == 0 {
            return Err(Error::InvalidConfigValue(
                "validation concurrency must be at least 1".to_string(),
            ));
        }
        if !(1..=28).contains(&self.schedule.reclassify_day_of_month) {
            return Err(Error::InvalidConfigValue(format!(
                "reclassify day of month must be within 1..=28, got {}",
                self.schedule.reclassify_day_of_month
            )));
        }
        Ok(())
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
            staleness: StalenessPolicy::default(),
            exclusion: ExclusionPolicy::default(),
            discovery: DiscoveryPolicy::default(),
            writer: WriterPolicy::default(),
            schedule: SchedulePolicy::default(),
            default_workers: DEFAULT_WORKERS_PER_DATA_TYPE,
            workers: HashMap::new(),
            run_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = SyncPolicy::default();
        assert_eq!(policy.lookback, Duration::days(1825));
        assert_eq!(policy.staleness.window(DataType::Price), Duration::days(1));
        assert_eq!(policy.staleness.window(DataType::Dividend), Duration::days(7));
        assert_eq!(policy.staleness.window(DataType::Holdings), Duration::days(7));
        assert!(policy.exclusion.is_critical(DataType::Price));
        assert!(!policy.exclusion.is_critical(DataType::Dividend));
        assert_eq!(policy.schedule.discovery_weekday, Weekday::Sun);
        assert_eq!(policy.workers_for(DataType::Intraday), 4);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_worker_override_per_data_type() {
        let policy = SyncPolicy::default().with_workers(DataType::Price, 16);
        assert_eq!(policy.workers_for(DataType::Price), 16);
        assert_eq!(policy.workers_for(DataType::Dividend), 4);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let policy = SyncPolicy::default().with_workers(DataType::Price, 0);
        assert!(matches!(policy.validate(), Err(Error::InvalidConfigValue(_))));

        let mut policy = SyncPolicy::default();
        policy.writer.batch_size = 0;
        assert!(policy.validate().is_err());

        let mut policy = SyncPolicy::default();
        policy.schedule.reclassify_day_of_month = 31;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_weekday_from_index_wraps() {
        assert_eq!(weekday_from_index(0), Weekday::Mon);
        assert_eq!(weekday_from_index(6), Weekday::Sun);
        assert_eq!(weekday_from_index(7), Weekday::Mon);
    }
}
