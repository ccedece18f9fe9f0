use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProviderId;

/// Broad instrument classification reported by discovery sources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    #[default]
    Equity,
    Etf,
    Trust,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Equity => "equity",
            AssetKind::Etf => "etf",
            AssetKind::Trust => "trust",
        }
    }

    /// Classify from a provider's security type label and instrument name.
    pub fn classify(security_type: &str, name: &str) -> Self {
        let security_type = security_type.to_ascii_uppercase();
        if security_type.contains("ETF") || security_type.contains("ETP") {
            return AssetKind::Etf;
        }
        let name = name.to_ascii_uppercase();
        if security_type.contains("TRUST") || name.ends_with(" TRUST") || name.contains(" TRUST ") {
            return AssetKind::Trust;
        }
        AssetKind::Equity
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equity" => Ok(AssetKind::Equity),
            "etf" => Ok(AssetKind::Etf),
            "trust" => Ok(AssetKind::Trust),
            other => Err(format!("Unknown asset kind: {}", other)),
        }
    }
}

/// A symbol reported by a discovery sweep, not yet tracked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSymbol {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub asset_kind: AssetKind,
    pub source: ProviderId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(AssetKind::classify("ETF", "SPDR S&P 500"), AssetKind::Etf);
        assert_eq!(AssetKind::classify("ETP", "iShares Gold"), AssetKind::Etf);
        assert_eq!(
            AssetKind::classify("Stock", "Sprott Physical Gold Trust"),
            AssetKind::Trust
        );
        assert_eq!(AssetKind::classify("Common Stock", "APPLE INC"), AssetKind::Equity);
    }
}
