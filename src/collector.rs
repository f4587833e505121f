//! Collection orchestrator.
//!
//! One [`Collector::collect`] call runs a small state machine:
//!
//! ```text
//! Fetching ──ok──▶ Validating ──ok──▶ Persisting ──ok──▶ Done(success)
//!   │  ▲              │                 │  ▲
//!   └──┘ retry        └──invalid──┐     └──┘ retry
//!   │                             ▼     │
//!   └────────exhausted──────▶ Done(failure) ◀──exhausted
//! ```
//!
//! Fetch and persist retries are budgeted independently by the same
//! [`RetryPolicy`]. A validation failure is terminal for the call.

use crate::client::{AirQualityClient, ClientConfig, ClientError, DEFAULT_BASE_URL};
use crate::mock::MockGenerator;
use crate::retry::{Backoff, RetryPolicy};
use crate::router::{self, RoutingMode, StorageTarget};
use crate::stats::{Stats, StatsTracker};
use crate::storage::{Storage, StorageError};
use crate::types::{RawRecord, ValidatedRecord};
use crate::validate::{self, ValidationError, ValidationLimits};
use chrono::Local;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] ClientError),
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Where measurements come from. Chosen once when the collector is built.
pub enum DataSource {
    /// The remote feed.
    Live(AirQualityClient),
    /// Locally generated readings, used when no token is configured.
    Synthetic(MockGenerator),
}

impl DataSource {
    /// `Live` when a non-blank token is given, `Synthetic` otherwise.
    pub fn from_token(
        token: Option<String>,
        timeout: Duration,
        base_url: &str,
    ) -> Result<Self, ClientError> {
        match token.filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                let config = ClientConfig::new(token)
                    .with_timeout(timeout)
                    .with_base_url(base_url);
                Ok(Self::Live(AirQualityClient::new(config)?))
            }
            None => Ok(Self::Synthetic(MockGenerator::new())),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic(_))
    }

    async fn fetch(&self, city: &str) -> Result<RawRecord, ClientError> {
        match self {
            Self::Live(client) => client.fetch(city).await,
            Self::Synthetic(generator) => Ok(generator.generate(city)),
        }
    }
}

/// Configuration for the collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Directory holding the database file(s)
    pub data_dir: PathBuf,
    pub routing: RoutingMode,
    pub retry: RetryPolicy,
    pub limits: ValidationLimits,
    /// Timeout for one feed request
    pub request_timeout: Duration,
    pub base_url: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            routing: RoutingMode::Shared,
            retry: RetryPolicy::default(),
            limits: ValidationLimits::default(),
            request_timeout: Duration::from_secs(10),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// A stored row and the file it went to.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored {
    pub id: i64,
    pub target: StorageTarget,
}

/// Result of one [`Collector::collect`] call.
#[derive(Debug)]
pub struct CollectionResult {
    pub success: bool,
    /// Fetch tries plus persist retries beyond the first.
    pub attempts: u32,
    pub fetch_attempts: u32,
    pub persist_attempts: u32,
    pub outcome: Result<Stored, CollectorError>,
}

enum Phase {
    Fetching,
    Validating(RawRecord),
    Persisting {
        record: ValidatedRecord,
        target: StorageTarget,
    },
    Done(Result<Stored, CollectorError>),
}

/// Runs fetch → validate → persist for a city and keeps statistics.
pub struct Collector {
    source: DataSource,
    storage: Storage,
    config: CollectorConfig,
    stats: StatsTracker,
}

impl Collector {
    /// Create a new collector.
    pub fn new(source: DataSource, storage: Storage, config: CollectorConfig) -> Self {
        Self {
            source,
            storage,
            config,
            stats: StatsTracker::new(),
        }
    }

    /// Consistent copy of the counters.
    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn is_synthetic(&self) -> bool {
        self.source.is_synthetic()
    }

    /// Database file that readings for `city` are written to.
    pub fn target_for(&self, city: &str) -> StorageTarget {
        router::resolve(&self.config.data_dir, city, self.config.routing)
    }

    /// Collect and store one reading for `city`.
    pub async fn collect(&self, city: &str) -> CollectionResult {
        tracing::info!("Collecting air quality for {}", city);
        self.stats.record_attempt();

        let policy = self.config.retry;
        let mut fetch_attempts = 0u32;
        let mut persist_attempts = 0u32;
        let mut phase = Phase::Fetching;

        let outcome = loop {
            phase = match phase {
                Phase::Fetching => {
                    fetch_attempts += 1;
                    match self.source.fetch(city).await {
                        Ok(raw) => Phase::Validating(raw),
                        Err(e) if policy.allows_retry(fetch_attempts) => {
                            let wait = policy.backoff.delay(fetch_attempts);
                            tracing::warn!(
                                "Fetch failed [attempt {}/{}]: {}, retrying in {:?}",
                                fetch_attempts,
                                policy.max_attempts,
                                e,
                                wait
                            );
                            sleep(wait).await;
                            Phase::Fetching
                        }
                        Err(e) => Phase::Done(Err(e.into())),
                    }
                }
                Phase::Validating(raw) => match validate::validate(&raw, &self.config.limits) {
                    Ok(record) => {
                        if record.truncated {
                            tracing::warn!(
                                "raw_data for {} truncated to {} characters",
                                record.city,
                                self.config.limits.raw_max_len
                            );
                        }
                        tracing::debug!(
                            "Validated {}: AQI {:?} ({:?})",
                            record.city,
                            record.aqi,
                            record.level.map(|l| l.label())
                        );
                        let target = self.target_for(city);
                        Phase::Persisting { record, target }
                    }
                    Err(e) => Phase::Done(Err(e.into())),
                },
                Phase::Persisting { record, target } => {
                    persist_attempts += 1;
                    match self.persist(&target, &record) {
                        Ok(id) => Phase::Done(Ok(Stored { id, target })),
                        Err(e) if policy.allows_retry(persist_attempts) => {
                            let wait = policy.backoff.delay(persist_attempts);
                            tracing::warn!(
                                "Storage write to {} failed [attempt {}/{}]: {}, retrying in {:?}",
                                target,
                                persist_attempts,
                                policy.max_attempts,
                                e,
                                wait
                            );
                            sleep(wait).await;
                            Phase::Persisting { record, target }
                        }
                        Err(e) => Phase::Done(Err(e.into())),
                    }
                }
                Phase::Done(outcome) => break outcome,
            };
        };

        self.settle(city, &outcome);

        CollectionResult {
            success: outcome.is_ok(),
            attempts: fetch_attempts + persist_attempts.saturating_sub(1),
            fetch_attempts,
            persist_attempts,
            outcome,
        }
    }

    fn persist(&self, target: &StorageTarget, record: &ValidatedRecord) -> Result<i64, StorageError> {
        self.storage.ensure_schema(target.path())?;
        self.storage.insert(target.path(), record)
    }

    fn settle(&self, city: &str, outcome: &Result<Stored, CollectorError>) {
        match outcome {
            Ok(stored) => {
                self.stats.record_success();
                tracing::info!("Stored reading for {} as row {} in {}", city, stored.id, stored.target);
            }
            Err(e @ CollectorError::Validation(_)) => {
                self.stats.record_validation_error();
                self.stats.record_error(e.to_string(), Local::now());
                tracing::error!("Rejected reading for {}: {}", city, e);
            }
            Err(e) => {
                self.stats.record_failure();
                self.stats.record_error(e.to_string(), Local::now());
                tracing::error!("Collection for {} failed after retries: {}", city, e);
            }
        }
    }
}

/// Builder for creating a Collector with custom configuration.
pub struct CollectorBuilder {
    token: Option<String>,
    config: CollectorConfig,
    busy_timeout: Option<Duration>,
}

impl CollectorBuilder {
    pub fn new() -> Self {
        Self {
            token: None,
            config: CollectorConfig::default(),
            busy_timeout: None,
        }
    }

    /// API token; leaving it unset selects synthetic data.
    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn per_city(mut self, per_city: bool) -> Self {
        self.config.routing = RoutingMode::from_flag(per_city);
        self
    }

    pub fn retry(mut self, max_attempts: u32, backoff: Backoff) -> Self {
        self.config.retry = RetryPolicy::new(max_attempts, backoff);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn raw_max_len(mut self, max: usize) -> Self {
        self.config.limits.raw_max_len = max;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Collector, CollectorError> {
        let source = DataSource::from_token(
            self.token,
            self.config.request_timeout,
            &self.config.base_url,
        )?;
        let storage = self.busy_timeout.map(Storage::new).unwrap_or_default();

        Ok(Collector::new(source, storage, self.config))
    }
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
