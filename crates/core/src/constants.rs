//! Engine defaults.

/// Full-history fetches start this many days before now.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 1825; // 5 years

/// Staleness windows. A (symbol, data type) pair last confirmed longer
/// ago than its window is due for a fetch.
pub const PRICE_STALENESS_DAYS: i64 = 1;
pub const INTRADAY_STALENESS_DAYS: i64 = 1;
pub const DIVIDEND_STALENESS_DAYS: i64 = 7;
pub const SPLIT_STALENESS_DAYS: i64 = 7;
pub const HOLDINGS_STALENESS_DAYS: i64 = 7;

/// All-sources-empty observations before a critical data type excludes its symbol.
pub const DEFAULT_EXCLUSION_THRESHOLD: u32 = 1;

/// Discovery validation windows.
pub const VALIDATION_PRICE_WINDOW_DAYS: i64 = 7;
pub const VALIDATION_DIVIDEND_WINDOW_DAYS: i64 = 365;

/// Concurrent validations during discovery.
pub const DEFAULT_VALIDATION_CONCURRENCY: usize = 4;

/// Worker pool width per data type.
pub const DEFAULT_WORKERS_PER_DATA_TYPE: usize = 4;

/// Upsert batching.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 500;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_WRITE_MAX_RETRIES: u32 = 3;
pub const DEFAULT_WRITE_RETRY_DELAY_MS: u64 = 500;

/// Pending write submissions buffered before workers block.
pub const WRITER_CHANNEL_CAPACITY: usize = 256;

/// Scheduled runs add discovery on this weekday (0 = Monday .. 6 = Sunday).
pub const DEFAULT_DISCOVERY_WEEKDAY: u32 = 6;

/// Scheduled runs add exclusion re-validation on this day of month.
pub const DEFAULT_RECLASSIFY_DAY_OF_MONTH: u32 = 1;
