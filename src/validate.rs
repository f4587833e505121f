//! Measurement validation.
//!
//! Rules run in a fixed order and the first violation wins:
//!
//! 1. `city` is present, non-blank and at most `city_max_len` characters.
//! 2. At least one of aqi/pm25/pm10/co/no2/o3/so2 is present.
//! 3. Every present number is finite and non-negative; `aqi` must also be a
//!    whole number no larger than `aqi_max`.
//! 4. `level`, when present, names a known [`AqiLevel`].
//! 5. `raw_data` longer than `raw_max_len` characters is truncated and
//!    flagged, never rejected.

use crate::types::{AqiLevel, RawRecord, ValidatedRecord, DEFAULT_SOURCE};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Bounds applied by [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub city_max_len: usize,
    pub aqi_max: i64,
    pub raw_max_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            city_max_len: 100,
            aqi_max: 500,
            raw_max_len: 1_000_000,
        }
    }
}

/// Check `record` against `limits`, producing a record that is safe to store.
pub fn validate(
    record: &RawRecord,
    limits: &ValidationLimits,
) -> Result<ValidatedRecord, ValidationError> {
    let city = record.city.trim();
    if city.is_empty() {
        return Err(ValidationError::new("city", "must not be empty"));
    }
    let city_len = city.chars().count();
    if city_len > limits.city_max_len {
        return Err(ValidationError::new(
            "city",
            format!("{} characters exceeds limit of {}", city_len, limits.city_max_len),
        ));
    }

    let numeric = [
        ("aqi", record.aqi),
        ("pm25", record.pm25),
        ("pm10", record.pm10),
        ("co", record.co),
        ("no2", record.no2),
        ("o3", record.o3),
        ("so2", record.so2),
    ];

    if numeric.iter().all(|(_, value)| value.is_none()) {
        return Err(ValidationError::new(
            "pollutants",
            "at least one of aqi, pm25, pm10, co, no2, o3, so2 is required",
        ));
    }

    for (field, value) in numeric {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(ValidationError::new(field, format!("{} is not a finite number", v)));
            }
            if v < 0.0 {
                return Err(ValidationError::new(field, format!("{} is negative", v)));
            }
        }
    }

    let aqi = match record.aqi {
        Some(v) if v.fract() != 0.0 => {
            return Err(ValidationError::new("aqi", format!("{} is not an integer", v)));
        }
        Some(v) if v > limits.aqi_max as f64 => {
            return Err(ValidationError::new(
                "aqi",
                format!("{} is outside 0..={}", v, limits.aqi_max),
            ));
        }
        Some(v) => Some(v as i64),
        None => None,
    };

    let level = match record.level.as_deref() {
        Some(text) => Some(
            text.parse::<AqiLevel>()
                .map_err(|e| ValidationError::new("level", e.to_string()))?,
        ),
        None => None,
    };

    let (raw_data, truncated) = cap_chars(&record.raw_data, limits.raw_max_len);

    let source = record
        .source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SOURCE)
        .to_string();

    Ok(ValidatedRecord {
        city: city.to_string(),
        timestamp: record.timestamp,
        aqi,
        pm25: record.pm25,
        pm10: record.pm10,
        co: record.co,
        no2: record.no2,
        o3: record.o3,
        so2: record.so2,
        level,
        source,
        raw_data,
        truncated,
    })
}

fn cap_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text.to_string(), false),
    }
}
