//! Tracked symbol domain models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use finsync_market_data::{AssetKind, DataType, DiscoveredSymbol};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Where a symbol stands in the admission lifecycle.
///
/// `Pending` symbols were discovered but not yet validated and are never
/// synced. `Excluded` symbols carry an exclusion record; a symbol found in
/// this state without one is re-admitted on the next run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    Pending,
    Active,
    Excluded,
}

impl AdmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionState::Pending => "pending",
            AdmissionState::Active => "active",
            AdmissionState::Excluded => "excluded",
        }
    }
}

impl fmt::Display for AdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdmissionState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AdmissionState::Pending),
            "active" => Ok(AdmissionState::Active),
            "excluded" => Ok(AdmissionState::Excluded),
            other => Err(ValidationError::InvalidInput(format!(
                "unknown admission state '{}'",
                other
            ))),
        }
    }
}

/// A tracked symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub asset_kind: AssetKind,
    pub discovery_source: Option<String>,
    pub state: AdmissionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Symbol {
    pub fn tracks(&self, data_type: DataType) -> bool {
        tracks_data_type(self.asset_kind, data_type)
    }
}

/// Input for registering a newly discovered symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSymbol {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub asset_kind: AssetKind,
    pub discovery_source: Option<String>,
}

impl From<DiscoveredSymbol> for NewSymbol {
    fn from(found: DiscoveredSymbol) -> Self {
        Self {
            symbol: found.symbol,
            name: found.name,
            exchange: found.exchange,
            asset_kind: found.asset_kind,
            discovery_source: Some(found.source.into_owned()),
        }
    }
}

/// Holdings only exist for ETFs; every other data type applies to all kinds.
pub fn tracks_data_type(kind: AssetKind, data_type: DataType) -> bool {
    data_type != DataType::Holdings || kind == AssetKind::Etf
}
