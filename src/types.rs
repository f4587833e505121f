//! Core data types for air-quality measurements.

use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Provider identifier recorded when a record carries no explicit source.
pub const DEFAULT_SOURCE: &str = "waqi";

/// Timestamp layout used in the `timestamp` column (matches SQLite's
/// `CURRENT_TIMESTAMP`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Air-quality category.
///
/// Breakpoints follow the Chinese national AQI scale. The stored form is the
/// Chinese label; the English names are accepted as aliases on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AqiLevel {
    Good,
    Moderate,
    UnhealthyForSensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiLevel {
    pub const ALL: [AqiLevel; 6] = [
        Self::Good,
        Self::Moderate,
        Self::UnhealthyForSensitive,
        Self::Unhealthy,
        Self::VeryUnhealthy,
        Self::Hazardous,
    ];

    /// Category for an index value.
    pub const fn from_aqi(aqi: i64) -> Self {
        match aqi {
            i64::MIN..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthyForSensitive,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    /// Label persisted in the `level` column.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Good => "优",
            Self::Moderate => "良",
            Self::UnhealthyForSensitive => "轻度污染",
            Self::Unhealthy => "中度污染",
            Self::VeryUnhealthy => "重度污染",
            Self::Hazardous => "严重污染",
        }
    }

    pub const fn english_name(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitive => "Unhealthy-for-Sensitive",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very-Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }
}

impl fmt::Display for AqiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a level string is not one of the known categories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown air quality level {0:?}")]
pub struct UnknownLevel(pub String);

impl FromStr for AqiLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.label() == s || level.english_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

/// A measurement as produced by a data source, before validation.
///
/// Numeric fields are already typed; anything the upstream sent that was not
/// a number decodes as `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub city: String,
    pub timestamp: Option<NaiveDateTime>,
    pub aqi: Option<f64>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub co: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub level: Option<String>,
    pub source: Option<String>,
    pub raw_data: String,
}

/// A measurement that passed every validation rule and may be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub city: String,
    pub timestamp: Option<NaiveDateTime>,
    pub aqi: Option<i64>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub co: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub level: Option<AqiLevel>,
    pub source: String,
    pub raw_data: String,
    /// Set when `raw_data` was cut to the configured maximum.
    pub truncated: bool,
}

/// A row read back from the `air_quality` table. `record.timestamp` holds the
/// stored value, defaulted by the database when the record carried none.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub record: ValidatedRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_breakpoints() {
        assert_eq!(AqiLevel::from_aqi(0), AqiLevel::Good);
        assert_eq!(AqiLevel::from_aqi(50), AqiLevel::Good);
        assert_eq!(AqiLevel::from_aqi(51), AqiLevel::Moderate);
        assert_eq!(AqiLevel::from_aqi(150), AqiLevel::UnhealthyForSensitive);
        assert_eq!(AqiLevel::from_aqi(200), AqiLevel::Unhealthy);
        assert_eq!(AqiLevel::from_aqi(300), AqiLevel::VeryUnhealthy);
        assert_eq!(AqiLevel::from_aqi(301), AqiLevel::Hazardous);
    }

    #[test]
    fn test_level_parse_accepts_labels_and_english_names() {
        assert_eq!("轻度污染".parse::<AqiLevel>(), Ok(AqiLevel::UnhealthyForSensitive));
        assert_eq!("very-unhealthy".parse::<AqiLevel>(), Ok(AqiLevel::VeryUnhealthy));
        assert_eq!(" Good ".parse::<AqiLevel>(), Ok(AqiLevel::Good));
        assert!("Terrible".parse::<AqiLevel>().is_err());
    }

    #[test]
    fn test_level_label_round_trip() {
        for level in AqiLevel::ALL {
            assert_eq!(level.label().parse::<AqiLevel>(), Ok(level));
        }
    }
}
