use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of time-series data synchronized per symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Price,
    Dividend,
    Holdings,
    Split,
    Intraday,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown data type: {0}")]
pub struct ParseDataTypeError(pub String);

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Price,
        DataType::Dividend,
        DataType::Holdings,
        DataType::Split,
        DataType::Intraday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Price => "price",
            DataType::Dividend => "dividend",
            DataType::Holdings => "holdings",
            DataType::Split => "split",
            DataType::Intraday => "intraday",
        }
    }

    /// Smallest step between two watermarks of this data type.
    ///
    /// An incremental fetch starts one unit after the stored cursor.
    pub fn time_unit(&self) -> Duration {
        match self {
            DataType::Intraday => Duration::minutes(1),
            _ => Duration::days(1),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price" | "prices" => Ok(DataType::Price),
            "dividend" | "dividends" => Ok(DataType::Dividend),
            "holdings" | "holding" => Ok(DataType::Holdings),
            "split" | "splits" => Ok(DataType::Split),
            "intraday" => Ok(DataType::Intraday),
            other => Err(ParseDataTypeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_plural_forms() {
        assert_eq!("prices".parse::<DataType>(), Ok(DataType::Price));
        assert_eq!("Dividends".parse::<DataType>(), Ok(DataType::Dividend));
        assert_eq!(" split ".parse::<DataType>(), Ok(DataType::Split));
        assert!("quotes".parse::<DataType>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for data_type in DataType::ALL {
            assert_eq!(data_type.to_string().parse::<DataType>(), Ok(data_type));
        }
    }

    #[test]
    fn test_time_unit() {
        assert_eq!(DataType::Price.time_unit(), Duration::days(1));
        assert_eq!(DataType::Intraday.time_unit(), Duration::minutes(1));
    }
}
