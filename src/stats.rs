//! Collection statistics.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;

/// Point-in-time copy of the collector's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub total_attempts: u64,
    pub successful_inserts: u64,
    pub failed_inserts: u64,
    pub validation_errors: u64,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Local>>,
}

impl Stats {
    /// Successful inserts as a fraction of attempts.
    pub fn success_rate(&self) -> f64 {
        self.successful_inserts as f64 / self.total_attempts.max(1) as f64
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Collection Statistics")?;
        writeln!(f, "=====================")?;
        writeln!(f, "Total attempts: {}", self.total_attempts)?;
        writeln!(f, "Successful inserts: {}", self.successful_inserts)?;
        writeln!(f, "Failed inserts: {}", self.failed_inserts)?;
        writeln!(f, "Validation errors: {}", self.validation_errors)?;
        write!(
            f,
            "Success rate: {}/{} ({:.1}%)",
            self.successful_inserts,
            self.total_attempts,
            self.success_rate() * 100.0
        )?;
        if let Some(ref error) = self.last_error {
            write!(f, "\nLast error: {}", error)?;
            if let Some(at) = self.last_error_time {
                write!(f, "\nError time: {}", at.to_rfc3339())?;
            }
        }
        Ok(())
    }
}

/// Counters owned by one collector. All updates go through a single lock so a
/// snapshot never sees a half-applied change.
#[derive(Debug, Default)]
pub struct StatsTracker {
    inner: Mutex<Stats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.inner.lock().total_attempts += 1;
    }

    pub fn record_success(&self) {
        self.inner.lock().successful_inserts += 1;
    }

    pub fn record_failure(&self) {
        self.inner.lock().failed_inserts += 1;
    }

    pub fn record_validation_error(&self) {
        self.inner.lock().validation_errors += 1;
    }

    pub fn record_error(&self, message: impl Into<String>, at: DateTime<Local>) {
        let mut stats = self.inner.lock();
        stats.last_error = Some(message.into());
        stats.last_error_time = Some(at);
    }

    pub fn snapshot(&self) -> Stats {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let tracker = StatsTracker::new();
        for _ in 0..3 {
            tracker.record_attempt();
        }
        tracker.record_success();
        tracker.record_success();
        tracker.record_validation_error();

        let snap = tracker.snapshot();
        assert_eq!(snap.total_attempts, 3);
        assert_eq!(snap.successful_inserts, 2);
        assert_eq!(snap.failed_inserts, 0);
        assert_eq!(snap.validation_errors, 1);
        assert!(snap.last_error.is_none());

        // Later updates do not leak into an earlier snapshot.
        tracker.record_failure();
        assert_eq!(snap.failed_inserts, 0);
        assert_eq!(tracker.snapshot().failed_inserts, 1);
    }

    #[test]
    fn test_record_error_keeps_latest() {
        let tracker = StatsTracker::new();
        let now = Local::now();
        tracker.record_error("first", now);
        tracker.record_error("second", now);

        let snap = tracker.snapshot();
        assert_eq!(snap.last_error.as_deref(), Some("second"));
        assert_eq!(snap.last_error_time, Some(now));
    }

    #[test]
    fn test_display_reports_rate() {
        let stats = Stats {
            total_attempts: 4,
            successful_inserts: 3,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("Success rate: 3/4 (75.0%)"));
        assert!(!text.contains("Last error"));
    }

    #[test]
    fn test_success_rate_with_no_attempts() {
        assert_eq!(Stats::default().success_rate(), 0.0);
    }
}
