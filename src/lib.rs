//! Air-quality collector library.
//!
//! This library provides functionality to:
//! - Fetch a city's current air-quality reading from the WAQI feed
//! - Fall back to synthetic readings when no API token is configured
//! - Validate readings before anything touches disk
//! - Store readings in SQLite, shared or one file per city
//! - Retry failed fetches and writes, keeping success/failure statistics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │ DataSource  │───▶│  Validator  │───▶│   Router    │───▶│   Storage   │
//! │ (Live/Mock) │    │             │    │ (city→file) │    │  (SQLite)   │
//! └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘
//!        │                                                        │
//!        └──────────────────────┬─────────────────────────────────┘
//!                               ▼
//!                      ┌─────────────────┐
//!                      │    Collector    │
//!                      │ (retry + stats) │
//!                      └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use airwatch::collector::CollectorBuilder;
//! use airwatch::retry::Backoff;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let collector = CollectorBuilder::new()
//!         .token(std::env::var("AQ_API_KEY").ok())
//!         .data_dir("data")
//!         .per_city(true)
//!         .retry(3, Backoff::Fixed(Duration::from_secs(1)))
//!         .build()?;
//!
//!     let result = collector.collect("北京").await;
//!     println!("success={} attempts={}", result.success, result.attempts);
//!     println!("{}", collector.stats());
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod collector;
pub mod mock;
pub mod retry;
pub mod router;
pub mod stats;
pub mod storage;
pub mod types;
pub mod validate;

pub use client::{AirQualityClient, ClientConfig, ClientError};
pub use collector::{CollectionResult, Collector, CollectorBuilder, CollectorConfig, DataSource};
pub use router::{resolve, RoutingMode, StorageTarget};
pub use stats::Stats;
pub use storage::{Storage, StorageError};
pub use types::{AqiLevel, RawRecord, StoredRecord, ValidatedRecord};
pub use validate::{validate, ValidationError, ValidationLimits};
