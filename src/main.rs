//! Air-quality collector CLI
//!
//! Fetches a city's air-quality reading on demand or on a schedule and stores
//! it in SQLite.

use airwatch::{
    collector::{CollectionResult, Collector, CollectorBuilder},
    mock::is_synthetic,
    retry::Backoff,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// One year.
const MAX_INTERVAL_HOURS: u64 = 24 * 366;

#[derive(Parser)]
#[command(name = "airwatch")]
#[command(about = "Air-quality collector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// City to monitor
    #[arg(short, long, env = "AQ_CITY", default_value = "北京")]
    city: String,

    /// WAQI API token; without one, synthetic readings are stored
    #[arg(long, env = "AQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Directory holding the database file(s)
    #[arg(short, long, env = "AQ_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Store each city in its own air_quality_{city}.db
    #[arg(long, env = "AQ_PER_CITY")]
    per_city: bool,

    /// Tries per step (fetch or write) before giving up
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Base delay between tries, in milliseconds
    #[arg(long, default_value = "1000")]
    retry_delay_ms: u64,

    /// How the delay grows between tries
    #[arg(long, value_enum, default_value = "fixed")]
    backoff: BackoffKind,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    /// Maximum stored length of the raw payload, in characters
    #[arg(long, default_value = "1000000")]
    raw_max_len: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "AQ_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long, env = "AQ_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect one reading and exit
    Once,

    /// Collect now and then on a fixed interval until interrupted
    Monitor {
        /// Hours between collections
        #[arg(short, long, env = "AQ_INTERVAL", default_value = "1",
              value_parser = clap::value_parser!(u64).range(1..=MAX_INTERVAL_HOURS))]
        interval_hours: u64,
    },

    /// Run several collections back to back, printing statistics after each
    Test {
        /// Number of collections
        #[arg(short, long, default_value = "3")]
        rounds: u32,

        /// Pause between collections in seconds
        #[arg(short, long, default_value = "2")]
        pause_secs: u64,
    },

    /// Show the most recent stored rows for the city's database
    Query {
        /// Number of rows to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

impl BackoffKind {
    fn with_base(self, base: Duration) -> Backoff {
        match self {
            Self::Fixed => Backoff::Fixed(base),
            Self::Linear => Backoff::Linear(base),
            Self::Exponential => Backoff::Exponential(base),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let log_guard = init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let collector = CollectorBuilder::new()
        .token(cli.api_key.clone())
        .data_dir(cli.data_dir.clone())
        .per_city(cli.per_city)
        .retry(
            cli.max_attempts,
            cli.backoff.with_base(Duration::from_millis(cli.retry_delay_ms)),
        )
        .request_timeout(Duration::from_secs(cli.timeout_secs))
        .raw_max_len(cli.raw_max_len)
        .build()?;

    if collector.is_synthetic() {
        tracing::warn!("No API key configured, storing synthetic readings");
    }
    tracing::info!("City: {}", cli.city);
    tracing::info!("Database: {}", collector.target_for(&cli.city));

    match cli.command {
        Commands::Once => {
            let result = collector.collect(&cli.city).await;
            report(&cli.city, &result);
            println!("{}", collector.stats());
            if !result.success {
                drop(log_guard);
                std::process::exit(1);
            }
        }

        Commands::Monitor { interval_hours } => {
            monitor(
                &collector,
                &cli.city,
                interval_hours,
                tokio::signal::ctrl_c(),
            )
            .await;
        }

        Commands::Test { rounds, pause_secs } => {
            println!(
                "Test run: city={}, database={}",
                cli.city,
                collector.target_for(&cli.city)
            );
            for round in 1..=rounds {
                println!("\n--- Round {} ---", round);
                let result = collector.collect(&cli.city).await;
                report(&cli.city, &result);
                println!("{}", collector.stats());
                if round < rounds {
                    tokio::time::sleep(Duration::from_secs(pause_secs)).await;
                }
            }
        }

        Commands::Query { limit } => {
            query(&collector, &cli.city, limit)?;
        }
    }

    Ok(())
}

fn init_logging(
    level: &str,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| format!("log file path {} has no file name", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

fn interval_period(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

/// Collect on every tick until `shutdown` resolves. The shutdown future lives
/// across iterations, so a signal that arrives during a collection is acted
/// on as soon as that collection finishes.
async fn monitor<F: Future>(collector: &Collector, city: &str, interval_hours: u64, shutdown: F) {
    tracing::info!("Monitoring {} every {} hour(s)", city, interval_hours);

    let mut interval = tokio::time::interval(interval_period(interval_hours));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = interval.tick() => {
                let result = collector.collect(city).await;
                report(city, &result);
            }
        }
    }

    let stats = collector.stats();
    tracing::info!("Final statistics:");
    tracing::info!("  Total attempts: {}", stats.total_attempts);
    tracing::info!("  Successful inserts: {}", stats.successful_inserts);
    tracing::info!("  Failed inserts: {}", stats.failed_inserts);
    tracing::info!("  Validation errors: {}", stats.validation_errors);
    println!("{}", stats);
}

fn report(city: &str, result: &CollectionResult) {
    match &result.outcome {
        Ok(stored) => println!(
            "Collection for {} succeeded (attempts: {}, row {} in {})",
            city, result.attempts, stored.id, stored.target
        ),
        Err(e) => println!(
            "Collection for {} failed (attempts: {}): {}",
            city, result.attempts, e
        ),
    }
}

fn query(collector: &Collector, city: &str, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let target = collector.target_for(city);
    let rows = collector.storage().recent(target.path(), None, limit)?;

    if rows.is_empty() {
        println!("No rows in {}", target);
        return Ok(());
    }

    println!("Latest {} row(s) in {}", rows.len(), target);
    println!();

    for row in rows {
        let record = &row.record;
        let timestamp = record
            .timestamp
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("#{} {} {}", row.id, timestamp, record.city);

        match (record.aqi, record.level) {
            (Some(aqi), Some(level)) => println!("  AQI: {} ({})", aqi, level),
            (Some(aqi), None) => println!("  AQI: {}", aqi),
            (None, _) => println!("  AQI: -"),
        }

        let pollutants = [
            ("PM2.5", record.pm25),
            ("PM10", record.pm10),
            ("CO", record.co),
            ("NO2", record.no2),
            ("O3", record.o3),
            ("SO2", record.so2),
        ];
        let present: Vec<String> = pollutants
            .iter()
            .filter_map(|(name, value)| value.map(|v| format!("{}={}", name, v)))
            .collect();
        if !present.is_empty() {
            println!("  {}", present.join(", "));
        }

        let mut source = record.source.clone();
        if is_synthetic(&record.raw_data) {
            source.push_str(" (synthetic)");
        }
        if record.truncated {
            source.push_str(" [raw payload truncated]");
        }
        println!("  Source: {}", source);
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn synthetic(dir: &Path) -> Collector {
        CollectorBuilder::new()
            .data_dir(dir)
            .retry(1, Backoff::Fixed(Duration::ZERO))
            .build()
            .unwrap()
    }

    #[test]
    fn test_interval_period_saturates() {
        assert_eq!(interval_period(1), Duration::from_secs(3600));
        assert_eq!(interval_period(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[tokio::test]
    async fn test_monitor_stops_on_pending_shutdown() {
        let dir = tempdir().unwrap();
        let collector = synthetic(dir.path());

        monitor(&collector, "北京", 1, async {}).await;
        assert_eq!(collector.stats().total_attempts, 0);
    }

    #[tokio::test]
    async fn test_monitor_collects_until_shutdown() {
        let dir = tempdir().unwrap();
        let collector = synthetic(dir.path());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let stop = async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(());
        };
        let run = monitor(&collector, "北京", MAX_INTERVAL_HOURS, async move {
            let _ = rx.await;
        });
        tokio::join!(stop, run);

        let stats = collector.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful_inserts, 1);
    }
}
