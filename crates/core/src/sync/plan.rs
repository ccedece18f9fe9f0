//! Run planning.
//!
//! A [`RunPlan`] is computed once when a run starts and fixes which phases
//! execute and which data types are synced. Nothing downstream looks at the
//! calendar.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use finsync_market_data::DataType;
use serde::Serialize;

use super::policy::SchedulePolicy;
use crate::errors::ValidationError;

/// Run phases, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discover,
    Validate,
    ReclassifyExclusions,
    Sync,
}

/// Which data types a sync run covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTypeFilter {
    All,
    PricesOnly,
    DividendsOnly,
    Only(BTreeSet<DataType>),
}

impl DataTypeFilter {
    /// Data types to sync; `All` means the configured set.
    pub fn resolve(&self, configured: &[DataType]) -> Vec<DataType> {
        match self {
            DataTypeFilter::All => configured.to_vec(),
            DataTypeFilter::PricesOnly => vec![DataType::Price],
            DataTypeFilter::DividendsOnly => vec![DataType::Dividend],
            DataTypeFilter::Only(set) => set.iter().copied().collect(),
        }
    }
}

impl FromStr for DataTypeFilter {
    type Err = ValidationError;

    /// Accepts `all`, `prices`, `dividends` or a comma-separated list of data types.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(DataTypeFilter::All),
            "prices" => Ok(DataTypeFilter::PricesOnly),
            "dividends" => Ok(DataTypeFilter::DividendsOnly),
            list => {
                let set = list
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| {
                        part.parse::<DataType>()
                            .map_err(|e| ValidationError::InvalidInput(e.to_string()))
                    })
                    .collect::<Result<BTreeSet<_>, _>>()?;
                if set.is_empty() {
                    return Err(ValidationError::InvalidInput(
                        "empty data type filter".to_string(),
                    ));
                }
                Ok(DataTypeFilter::Only(set))
            }
        }
    }
}

/// What the operator asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Daily run; extra phases come from the schedule policy.
    Scheduled,
    Discover,
    Validate,
    Sync(DataTypeFilter),
    ReclassifyExclusions,
}

impl RunMode {
    pub fn label(&self) -> &'static str {
        match self {
            RunMode::Scheduled => "scheduled",
            RunMode::Discover => "discover",
            RunMode::Validate => "validate",
            RunMode::Sync(_) => "sync",
            RunMode::ReclassifyExclusions => "reclassify-exclusions",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Phases and data types of one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    pub date: NaiveDate,
    pub mode: RunMode,
    pub phases: BTreeSet<Phase>,
    pub data_types: Vec<DataType>,
    /// Ignore cursors and staleness. Exclusions still apply.
    pub force_full_refresh: bool,
}

impl RunPlan {
    pub fn for_date(date: NaiveDate, mode: RunMode, schedule: &SchedulePolicy) -> Self {
        let mut phases = BTreeSet::new();
        let mut data_types = Vec::new();

        match &mode {
            RunMode::Scheduled => {
                if date.weekday() == schedule.discovery_weekday {
                    phases.insert(Phase::Discover);
                    phases.insert(Phase::Validate);
                }
                if date.day() == schedule.reclassify_day_of_month {
                    phases.insert(Phase::ReclassifyExclusions);
                }
                phases.insert(Phase::Sync);
                data_types = schedule.data_types.clone();
            }
            RunMode::Discover => {
                phases.insert(Phase::Discover);
                phases.insert(Phase::Validate);
            }
            RunMode::Validate => {
                phases.insert(Phase::Validate);
            }
            RunMode::Sync(filter) => {
                phases.insert(Phase::Sync);
                data_types = filter.resolve(&schedule.data_types);
            }
            RunMode::ReclassifyExclusions => {
                phases.insert(Phase::ReclassifyExclusions);
            }
        }

        Self {
            date,
            mode,
            phases,
            data_types,
            force_full_refresh: false,
        }
    }

    pub fn with_full_refresh(mut self, force: bool) -> Self {
        self.force_full_refresh = force;
        self
    }

    pub fn includes(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}
