//! HTTP client for the WAQI air-quality feed.

use crate::types::{AqiLevel, RawRecord, DEFAULT_SOURCE, TIMESTAMP_FORMAT};
use chrono::{DateTime, NaiveDateTime};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client, Url,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.waqi.info";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("API returned {status}: {message}")]
    Api { status: String, message: String },
    #[error("Malformed response: {0}")]
    Parse(String),
    #[error("Invalid client configuration: {0}")]
    Config(String),
}

// Request URLs carry the token, so they never reach an error message.
impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.without_url())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Configuration for the air-quality client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API token, sent as the `token` query parameter
    pub token: String,
    /// Request timeout
    pub timeout: Duration,
    /// Service root, e.g. `https://api.waqi.info`
    pub base_url: String,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(token: String) -> Self {
        Self {
            token,
            timeout: Duration::from_secs(10),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: concat!("airwatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Client for fetching one city's current reading.
pub struct AirQualityClient {
    client: Client,
    config: ClientConfig,
}

impl AirQualityClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        // Fail at construction rather than on the first fetch.
        let base = feed_url(&config.base_url, "here", &config.token)?;

        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true);

        // Local mirrors never go through a system proxy.
        if matches!(base.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")) {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    /// Fetch and decode the current reading for `city`. Never retries.
    pub async fn fetch(&self, city: &str) -> Result<RawRecord, ClientError> {
        let url = feed_url(&self.config.base_url, city, &self.config.token)?;

        tracing::debug!("Fetching feed for {} from {}", city, self.config.base_url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: format!("HTTP {}", status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response.text().await?;
        parse_feed(&body, city)
    }
}

/// `{base}/feed/{city}/?token={token}` with the city percent-encoded.
fn feed_url(base_url: &str, city: &str, token: &str) -> Result<Url, ClientError> {
    let mut url =
        Url::parse(base_url).map_err(|e| ClientError::Config(format!("{}: {}", base_url, e)))?;

    url.path_segments_mut()
        .map_err(|_| ClientError::Config(format!("{} cannot be a base URL", base_url)))?
        .pop_if_empty()
        .extend(["feed", city, ""]);
    url.query_pairs_mut().append_pair("token", token);

    Ok(url)
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct FeedData {
    aqi: Value,
    #[serde(default)]
    city: Option<FeedCity>,
    #[serde(default)]
    iaqi: HashMap<String, FeedMeasurement>,
    #[serde(default)]
    time: Option<FeedTime>,
}

#[derive(Debug, Deserialize)]
struct FeedCity {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedMeasurement {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct FeedTime {
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    tz: Option<String>,
    #[serde(default)]
    iso: Option<String>,
}

impl FeedTime {
    /// Observation time in UTC. `s` is station-local wall-clock time, so it
    /// is only usable together with `tz`.
    fn observed_at(&self) -> Option<NaiveDateTime> {
        let parsed = match (self.iso.as_deref(), self.s.as_deref(), self.tz.as_deref()) {
            (Some(iso), _, _) => DateTime::parse_from_rfc3339(iso.trim()),
            (None, Some(s), Some(tz)) => DateTime::parse_from_str(
                &format!("{} {}", s.trim(), tz.trim()),
                &format!("{} %:z", TIMESTAMP_FORMAT),
            ),
            _ => {
                tracing::debug!("Observation time has no UTC offset, leaving it to the database");
                return None;
            }
        };

        match parsed {
            Ok(at) => Some(at.naive_utc()),
            Err(e) => {
                tracing::debug!("Ignoring unparseable observation time {:?}: {}", self, e);
                None
            }
        }
    }
}

/// Decode a feed response body.
///
/// The service reports failures inside a 200 response as
/// `{"status": "error", "data": "<message>"}`; those become
/// [`ClientError::Api`]. The body is kept verbatim as `raw_data`.
pub fn parse_feed(body: &str, requested_city: &str) -> Result<RawRecord, ClientError> {
    let envelope: Envelope = serde_json::from_str(body)?;

    if envelope.status != "ok" {
        let message = match envelope.data {
            Value::String(s) => s,
            Value::Null => "Unknown error".to_string(),
            other => other.to_string(),
        };
        return Err(ClientError::Api {
            status: envelope.status,
            message,
        });
    }

    if !envelope.data.is_object() {
        return Err(ClientError::Parse(
            "\"data\" is missing or not an object".to_string(),
        ));
    }
    let data: FeedData = serde_json::from_value(envelope.data)?;

    let aqi = number(&data.aqi);
    let pollutant = |code: &str| data.iaqi.get(code).and_then(|m| number(&m.v));

    let city = data
        .city
        .as_ref()
        .and_then(|c| c.name.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(requested_city)
        .to_string();

    let timestamp = data.time.as_ref().and_then(FeedTime::observed_at);

    Ok(RawRecord {
        city,
        timestamp,
        aqi,
        pm25: pollutant("pm25"),
        pm10: pollutant("pm10"),
        co: pollutant("co"),
        no2: pollutant("no2"),
        o3: pollutant("o3"),
        so2: pollutant("so2"),
        level: aqi.map(|v| AqiLevel::from_aqi(v as i64).label().to_string()),
        source: Some(DEFAULT_SOURCE.to_string()),
        raw_data: body.to_string(),
    })
}

/// Numbers may arrive as JSON numbers or numeric strings; `"-"` means no reading.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_BODY: &str = r#"{
        "status": "ok",
        "data": {
            "aqi": 74,
            "idx": 1451,
            "city": {"name": "Beijing (北京)", "geo": [39.95, 116.46]},
            "iaqi": {
                "pm25": {"v": 74},
                "pm10": {"v": 31},
                "co": {"v": 4.6},
                "no2": {"v": 9.2},
                "o3": {"v": 30.5},
                "so2": {"v": "-"},
                "t": {"v": 12}
            },
            "time": {"s": "2024-03-09 14:00:00", "tz": "+08:00"}
        }
    }"#;

    #[test]
    fn test_parse_ok_envelope() {
        let record = parse_feed(OK_BODY, "北京").unwrap();
        assert_eq!(record.city, "Beijing (北京)");
        assert_eq!(record.aqi, Some(74.0));
        assert_eq!(record.pm25, Some(74.0));
        assert_eq!(record.co, Some(4.6));
        assert_eq!(record.so2, None);
        assert_eq!(record.level.as_deref(), Some("良"));
        assert_eq!(record.source.as_deref(), Some("waqi"));
        assert_eq!(
            record.timestamp.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            Some("2024-03-09 06:00:00".to_string())
        );
        assert_eq!(record.raw_data, OK_BODY);
    }

    #[test]
    fn test_observation_time_normalized_to_utc() {
        let at = |time: &str| {
            let body = format!(
                r#"{{"status":"ok","data":{{"aqi":20,"iaqi":{{}},"time":{}}}}}"#,
                time
            );
            parse_feed(&body, "北京")
                .unwrap()
                .timestamp
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        };

        assert_eq!(
            at(r#"{"s":"2024-03-09 20:30:00","tz":"-05:00"}"#).as_deref(),
            Some("2024-03-10 01:30:00")
        );
        assert_eq!(
            at(r#"{"iso":"2024-03-09T14:00:00+08:00"}"#).as_deref(),
            Some("2024-03-09 06:00:00")
        );
        // Without an offset the local time cannot be placed.
        assert_eq!(at(r#"{"s":"2024-03-09 14:00:00"}"#), None);
        assert_eq!(at(r#"{"s":"yesterday","tz":"+08:00"}"#), None);
    }

    #[test]
    fn test_parse_error_envelope() {
        let err = parse_feed(r#"{"status":"error","data":"Unknown station"}"#, "atlantis")
            .unwrap_err();
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, "error");
                assert_eq!(message, "Unknown station");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(matches!(
            parse_feed("<html>busy</html>", "北京"),
            Err(ClientError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_missing_required_fields() {
        assert!(matches!(
            parse_feed(r#"{"data": {"aqi": 10}}"#, "北京"),
            Err(ClientError::Parse(_))
        ));
        assert!(matches!(
            parse_feed(r#"{"status": "ok"}"#, "北京"),
            Err(ClientError::Parse(_))
        ));
        assert!(matches!(
            parse_feed(r#"{"status": "ok", "data": {"iaqi": {}}}"#, "北京"),
            Err(ClientError::Parse(_))
        ));
    }

    #[test]
    fn test_placeholder_aqi_and_fallback_city() {
        let body = r#"{"status":"ok","data":{"aqi":"-","iaqi":{"pm10":{"v":"18"}}}}"#;
        let record = parse_feed(body, "拉萨").unwrap();
        assert_eq!(record.city, "拉萨");
        assert_eq!(record.aqi, None);
        assert_eq!(record.level, None);
        assert_eq!(record.pm10, Some(18.0));
        assert_eq!(record.timestamp, None);
    }

    #[test]
    fn test_feed_url_encodes_city_and_token() {
        let url = feed_url("https://api.waqi.info", "New York", "t0k").unwrap();
        assert_eq!(url.as_str(), "https://api.waqi.info/feed/New%20York/?token=t0k");

        let url = feed_url("http://127.0.0.1:8080/", "北京", "demo").unwrap();
        assert!(url.as_str().starts_with("http://127.0.0.1:8080/feed/%E5%8C%97%E4%BA%AC/"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = ClientConfig::new("demo".to_string()).with_base_url("not a url");
        assert!(matches!(
            AirQualityClient::new(config),
            Err(ClientError::Config(_))
        ));
    }
}
