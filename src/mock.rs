//! Synthetic readings for running without an API token.

use crate::types::{AqiLevel, RawRecord};
use chrono::Local;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

/// Source identifier stored for synthetic rows.
pub const MOCK_SOURCE: &str = "mock";

/// Generates plausible readings that always pass validation.
///
/// `raw_data` is `{"mock": true, "generated_at": ...}` so synthetic rows can
/// be told apart from real ones after storage.
pub struct MockGenerator {
    rng: Mutex<StdRng>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn generate(&self, city: &str) -> RawRecord {
        let mut rng = self.rng.lock();
        let aqi: i64 = rng.gen_range(50..=200);
        let mut reading = |low: f64, high: f64| round2(rng.gen_range(low..=high));

        let pm25 = reading(10.0, 150.0);
        let pm10 = reading(20.0, 200.0);
        let co = reading(0.5, 3.0);
        let no2 = reading(10.0, 100.0);
        let o3 = reading(20.0, 200.0);
        let so2 = reading(5.0, 50.0);

        let raw = json!({
            "mock": true,
            "generated_at": Local::now().to_rfc3339(),
        });

        RawRecord {
            city: city.to_string(),
            timestamp: None,
            aqi: Some(aqi as f64),
            pm25: Some(pm25),
            pm10: Some(pm10),
            co: Some(co),
            no2: Some(no2),
            o3: Some(o3),
            so2: Some(so2),
            level: Some(AqiLevel::from_aqi(aqi).label().to_string()),
            source: Some(MOCK_SOURCE.to_string()),
            raw_data: raw.to_string(),
        }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a stored payload came from [`MockGenerator`].
pub fn is_synthetic(raw_data: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(raw_data)
        .map(|v| v.get("mock").and_then(|m| m.as_bool()).unwrap_or(false))
        .unwrap_or(false)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
