//! Environment-driven configuration.
//!
//! Every engine knob has a default in `finsync_core::constants`; variables
//! listed here override them. Unparseable numbers fall back to the default
//! with a warning, unknown data type names are rejected.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context};
use chrono::Duration;
use finsync_core::constants::DEFAULT_WORKERS_PER_DATA_TYPE;
use finsync_core::SyncPolicy;
use finsync_market_data::registry::DEFAULT_ATTEMPT_TIMEOUT;
use finsync_market_data::DataType;

pub const DEFAULT_DB_PATH: &str = "./data/finsync.db";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: String,
    pub alpha_vantage_api_key: Option<String>,
    pub finnhub_api_key: Option<String>,
    /// Bound on a single provider call.
    pub attempt_timeout: StdDuration,
    /// Provider order per data type, by provider id.
    pub priorities: HashMap<DataType, Vec<String>>,
    pub policy: SyncPolicy,
}

impl CliConfig {
    /// Reads the process environment. Load `.env` first if wanted.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let mut policy = SyncPolicy::default();
        policy.lookback =
            Duration::days(env.parse("FINSYNC_LOOKBACK_DAYS", policy.lookback.num_days()));
        policy.default_workers = env.parse("FINSYNC_WORKERS", DEFAULT_WORKERS_PER_DATA_TYPE);
        policy.exclusion.threshold =
            env.parse("FINSYNC_EXCLUSION_THRESHOLD", policy.exclusion.threshold);
        policy.writer.batch_size = env.parse("FINSYNC_BATCH_SIZE", policy.writer.batch_size);
        policy.writer.flush_interval = StdDuration::from_millis(env.parse(
            "FINSYNC_FLUSH_INTERVAL_MS",
            policy.writer.flush_interval.as_millis() as u64,
        ));
        policy.writer.max_retries =
            env.parse("FINSYNC_WRITE_MAX_RETRIES", policy.writer.max_retries);
        policy.discovery.validation_concurrency = env.parse(
            "FINSYNC_VALIDATION_CONCURRENCY",
            policy.discovery.validation_concurrency,
        );
        policy.schedule.reclassify_day_of_month = env.parse(
            "FINSYNC_RECLASSIFY_DAY",
            policy.schedule.reclassify_day_of_month,
        );
        policy.run_timeout = env
            .parse_opt::<u64>("FINSYNC_RUN_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(StdDuration::from_secs);

        if let Some(raw) = env.get("FINSYNC_CRITICAL_TYPES") {
            policy.exclusion.critical_data_types = parse_data_types(&raw)
                .context("invalid FINSYNC_CRITICAL_TYPES")?
                .into_iter()
                .collect();
        }
        if let Some(raw) = env.get("FINSYNC_DATA_TYPES") {
            policy.schedule.data_types = parse_data_types(&raw)
                .context("invalid FINSYNC_DATA_TYPES")?
                .into_iter()
                .collect();
        }

        let mut priorities = HashMap::new();
        for data_type in DataType::ALL {
            let suffix = data_type.as_str().to_ascii_uppercase();

            let workers_key = format!("FINSYNC_WORKERS_{suffix}");
            if let Some(workers) = env.parse_opt::<usize>(&workers_key) {
                policy.workers.insert(data_type, workers);
            }

            let stale_key = format!("FINSYNC_STALE_{suffix}_HOURS");
            if let Some(hours) = env.parse_opt::<i64>(&stale_key) {
                policy.staleness = policy
                    .staleness
                    .with_window(data_type, Duration::hours(hours));
            }

            if let Some(order) = env.get(&format!("FINSYNC_PRIORITY_{suffix}")) {
                let order: Vec<String> = order
                    .split(',')
                    .map(|id| id.trim().to_ascii_uppercase())
                    .filter(|id| !id.is_empty())
                    .collect();
                if !order.is_empty() {
                    priorities.insert(data_type, order);
                }
            }
        }

        policy.validate()?;

        Ok(Self {
            db_path: env
                .get("FINSYNC_DB_PATH")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            alpha_vantage_api_key: env.get("ALPHA_VANTAGE_API_KEY"),
            finnhub_api_key: env.get("FINNHUB_API_KEY"),
            attempt_timeout: StdDuration::from_secs(env.parse(
                "FINSYNC_ATTEMPT_TIMEOUT_SECS",
                DEFAULT_ATTEMPT_TIMEOUT.as_secs(),
            )),
            priorities,
            policy,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.parse_opt(key).unwrap_or(default)
    }

    /// `None` when unset or unparseable.
    fn parse_opt<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring unparseable value for {}: {:?}", key, raw);
                None
            }
        }
    }
}

fn parse_data_types(raw: &str) -> anyhow::Result<BTreeSet<DataType>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<DataType>().map_err(|e| anyhow!(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<CliConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CliConfig::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.db_path, DEFAULT_DB_PATH);
        assert!(config.alpha_vantage_api_key.is_none());
        assert!(config.finnhub_api_key.is_none());
        assert_eq!(config.attempt_timeout, DEFAULT_ATTEMPT_TIMEOUT);
        assert!(config.priorities.is_empty());
        assert_eq!(config.policy, SyncPolicy::default());
    }

    #[test]
    fn test_overrides_apply_per_data_type() {
        let config = config_from(&[
            ("FINSYNC_DB_PATH", "/tmp/x.db"),
            ("FINNHUB_API_KEY", "abc"),
            ("FINSYNC_WORKERS_DIVIDEND", "2"),
            ("FINSYNC_STALE_PRICE_HOURS", "6"),
            ("FINSYNC_PRIORITY_PRICE", "finnhub, alpha_vantage"),
            ("FINSYNC_RUN_TIMEOUT_SECS", "600"),
            ("FINSYNC_CRITICAL_TYPES", "price,dividend"),
        ])
        .unwrap();

        assert_eq!(config.db_path, "/tmp/x.db");
        assert_eq!(config.finnhub_api_key.as_deref(), Some("abc"));
        assert_eq!(config.policy.workers_for(DataType::Dividend), 2);
        assert_eq!(
            config.policy.workers_for(DataType::Price),
            DEFAULT_WORKERS_PER_DATA_TYPE
        );
        assert_eq!(config.policy.staleness.window(DataType::Price), Duration::hours(6));
        assert_eq!(
            config.priorities.get(&DataType::Price),
            Some(&vec!["FINNHUB".to_string(), "ALPHA_VANTAGE".to_string()])
        );
        assert_eq!(config.policy.run_timeout, Some(StdDuration::from_secs(600)));
        assert!(config.policy.exclusion.is_critical(DataType::Dividend));
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("FINSYNC_BATCH_SIZE", "lots"),
            ("FINSYNC_WORKERS_PRICE", "-1"),
        ])
        .unwrap();
        assert_eq!(config.policy.writer.batch_size, SyncPolicy::default().writer.batch_size);
        assert_eq!(
            config.policy.workers_for(DataType::Price),
            DEFAULT_WORKERS_PER_DATA_TYPE
        );
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let err = config_from(&[("FINSYNC_WORKERS_PRICE", "0")]).unwrap_err();
        assert!(err.to_string().contains("worker pool width"));
    }

    #[test]
    fn test_unknown_critical_type_is_rejected() {
        assert!(config_from(&[("FINSYNC_CRITICAL_TYPES", "price,options")]).is_err());
    }
}
