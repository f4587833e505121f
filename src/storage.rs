//! SQLite persistence for validated measurements.
//!
//! Every operation opens its own connection to the target file and drops it
//! before returning, so nothing is held open between collections. Writers to
//! the same file are serialized by SQLite itself; the busy timeout bounds how
//! long an insert waits for a competing writer.
//!
//! # Table Layout
//!
//! ```text
//! air_quality
//! ┌───────────────┬──────────────────────────────────────┐
//! │ id            │ INTEGER PRIMARY KEY AUTOINCREMENT     │
//! │ timestamp     │ DATETIME DEFAULT CURRENT_TIMESTAMP    │
//! │ city          │ TEXT NOT NULL                         │
//! │ aqi           │ INTEGER                               │
//! │ pm25 .. so2   │ REAL                                  │
//! │ level         │ TEXT                                  │
//! │ source        │ TEXT DEFAULT 'waqi'                   │
//! │ raw_data      │ TEXT                                  │
//! │ raw_truncated │ INTEGER NOT NULL DEFAULT 0            │
//! └───────────────┴──────────────────────────────────────┘
//! ```

use crate::types::{AqiLevel, StoredRecord, ValidatedRecord, DEFAULT_SOURCE, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Insert affected no rows")]
    NoRowInserted,
    #[error("Invalid stored row {id}: {reason}")]
    InvalidRow { id: i64, reason: String },
}

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS air_quality (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
        city TEXT NOT NULL,
        aqi INTEGER,
        pm25 REAL,
        pm10 REAL,
        co REAL,
        no2 REAL,
        o3 REAL,
        so2 REAL,
        level TEXT,
        source TEXT DEFAULT 'waqi',
        raw_data TEXT,
        raw_truncated INTEGER NOT NULL DEFAULT 0
    )";

/// Databases written before truncation was tracked lack this column.
const ADD_TRUNCATED_COLUMN: &str =
    "ALTER TABLE air_quality ADD COLUMN raw_truncated INTEGER NOT NULL DEFAULT 0";

const INSERT: &str = "
    INSERT INTO air_quality
        (timestamp, city, aqi, pm25, pm10, co, no2, o3, so2, level, source, raw_data, raw_truncated)
    VALUES (COALESCE(?1, CURRENT_TIMESTAMP), ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const SELECT_COLUMNS: &str = "
    SELECT id, timestamp, city, aqi, pm25, pm10, co, no2, o3, so2, level, source, raw_data, raw_truncated
    FROM air_quality";

/// Default wait for a competing writer's lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Stateless handle over the `air_quality` table; the target file is chosen
/// per call.
#[derive(Debug, Clone)]
pub struct Storage {
    busy_timeout: Duration,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(DEFAULT_BUSY_TIMEOUT)
    }
}

impl Storage {
    pub fn new(busy_timeout: Duration) -> Self {
        Self { busy_timeout }
    }

    /// Create the table in `path` if it does not exist yet. Idempotent.
    pub fn ensure_schema(&self, path: &Path) -> Result<(), StorageError> {
        let conn = self.open(path)?;
        Self::apply_schema(&conn)
    }

    /// Insert one record, returning its row id.
    pub fn insert(&self, path: &Path, record: &ValidatedRecord) -> Result<i64, StorageError> {
        let conn = self.open(path)?;
        Self::apply_schema(&conn)?;

        let timestamp = record
            .timestamp
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string());

        let affected = conn.execute(
            INSERT,
            params![
                timestamp,
                record.city,
                record.aqi,
                record.pm25,
                record.pm10,
                record.co,
                record.no2,
                record.o3,
                record.so2,
                record.level.map(|l| l.label()),
                record.source,
                record.raw_data,
                record.truncated,
            ],
        )?;

        if affected == 0 {
            return Err(StorageError::NoRowInserted);
        }

        let id = conn.last_insert_rowid();
        tracing::debug!("Inserted row {} into {}", id, path.display());
        Ok(id)
    }

    /// Most recent rows first, optionally restricted to one city.
    pub fn recent(
        &self,
        path: &Path,
        city: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let conn = self.open(path)?;
        Self::apply_schema(&conn)?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match city {
            Some(city) => {
                let sql = format!("{} WHERE city = ?1 ORDER BY id DESC LIMIT ?2", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![city, limit], RowData::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!("{} ORDER BY id DESC LIMIT ?1", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![limit], RowData::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        rows.into_iter().map(RowData::into_stored).collect()
    }

    /// Number of stored rows.
    pub fn count(&self, path: &Path) -> Result<u64, StorageError> {
        let conn = self.open(path)?;
        Self::apply_schema(&conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM air_quality", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn open(&self, path: &Path) -> Result<Connection, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn apply_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(CREATE_TABLE)?;

        let columns = {
            let mut stmt = conn.prepare("PRAGMA table_info(air_quality)")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;
            names
        };
        let has_truncated = columns.iter().any(|name| name == "raw_truncated");

        if !has_truncated {
            tracing::info!("Adding raw_truncated column to existing air_quality table");
            conn.execute_batch(ADD_TRUNCATED_COLUMN)?;
        }

        Ok(())
    }
}

/// Column values as read, before conversion into domain types.
struct RowData {
    id: i64,
    timestamp: Option<String>,
    city: String,
    aqi: Option<i64>,
    pm25: Option<f64>,
    pm10: Option<f64>,
    co: Option<f64>,
    no2: Option<f64>,
    o3: Option<f64>,
    so2: Option<f64>,
    level: Option<String>,
    source: Option<String>,
    raw_data: Option<String>,
    truncated: bool,
}

impl RowData {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            city: row.get(2)?,
            aqi: row.get(3)?,
            pm25: row.get(4)?,
            pm10: row.get(5)?,
            co: row.get(6)?,
            no2: row.get(7)?,
            o3: row.get(8)?,
            so2: row.get(9)?,
            level: row.get(10)?,
            source: row.get(11)?,
            raw_data: row.get(12)?,
            truncated: row.get(13)?,
        })
    }

    fn into_stored(self) -> Result<StoredRecord, StorageError> {
        let id = self.id;

        let timestamp = match self.timestamp.as_deref() {
            Some(text) => Some(NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map_err(
                |e| StorageError::InvalidRow {
                    id,
                    reason: format!("timestamp {:?}: {}", text, e),
                },
            )?),
            None => None,
        };

        let level = match self.level.as_deref() {
            Some(text) => Some(text.parse::<AqiLevel>().map_err(|e| StorageError::InvalidRow {
                id,
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(StoredRecord {
            id,
            record: ValidatedRecord {
                city: self.city,
                timestamp,
                aqi: self.aqi,
                pm25: self.pm25,
                pm10: self.pm10,
                co: self.co,
                no2: self.no2,
                o3: self.o3,
                so2: self.so2,
                level,
                source: self.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                raw_data: self.raw_data.unwrap_or_default(),
                truncated: self.truncated,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn record(city: &str) -> ValidatedRecord {
        ValidatedRecord {
            city: city.to_string(),
            timestamp: None,
            aqi: Some(132),
            pm25: Some(98.25),
            pm10: Some(140.0),
            co: Some(1.1),
            no2: Some(45.5),
            o3: None,
            so2: Some(7.0),
            level: Some(AqiLevel::UnhealthyForSensitive),
            source: "waqi".to_string(),
            raw_data: r#"{"status":"ok","data":{"aqi":132}}"#.to_string(),
            truncated: false,
        }
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aq.db");
        let storage = Storage::default();

        storage.ensure_schema(&path).unwrap();
        storage.ensure_schema(&path).unwrap();
        assert_eq!(storage.count(&path).unwrap(), 0);
    }

    #[test]
    fn test_insert_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("aq.db");
        let storage = Storage::default();
        let original = record("北京");

        let id = storage.insert(&path, &original).unwrap();
        let rows = storage.recent(&path, Some("北京"), 10).unwrap();
        assert_eq!(rows.len(), 1);

        let stored = &rows[0];
        assert_eq!(stored.id, id);
        assert!(stored.record.timestamp.is_some(), "timestamp should default");

        let mut expected = original;
        expected.timestamp = stored.record.timestamp;
        assert_eq!(stored.record, expected);
    }

    #[test]
    fn test_explicit_timestamp_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aq.db");
        let storage = Storage::default();

        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        let mut rec = record("上海");
        rec.timestamp = Some(ts);
        rec.truncated = true;

        storage.insert(&path, &rec).unwrap();
        let stored = storage.recent(&path, None, 1).unwrap().remove(0);
        assert_eq!(stored.record.timestamp, Some(ts));
        assert!(stored.record.truncated);
    }

    #[test]
    fn test_ids_increase_and_recent_orders_newest_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aq.db");
        let storage = Storage::default();

        let first = storage.insert(&path, &record("广州")).unwrap();
        let second = storage.insert(&path, &record("深圳")).unwrap();
        assert!(second > first);

        let rows = storage.recent(&path, None, 10).unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(storage.recent(&path, Some("广州"), 10).unwrap().len(), 1);
        assert_eq!(storage.count(&path).unwrap(), 2);
    }

    #[test]
    fn test_legacy_table_gains_truncated_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE air_quality (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                    city TEXT NOT NULL,
                    aqi INTEGER, pm25 REAL, pm10 REAL, co REAL, no2 REAL, o3 REAL, so2 REAL,
                    level TEXT, source TEXT DEFAULT 'waqi', raw_data TEXT
                );
                INSERT INTO air_quality (city, aqi, level, raw_data) VALUES ('北京', 40, '优', '{}');",
            )
            .unwrap();
        }

        let storage = Storage::default();
        let rows = storage.recent(&path, None, 5).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].record.truncated);
        assert_eq!(rows[0].record.level, Some(AqiLevel::Good));

        storage.insert(&path, &record("北京")).unwrap();
        assert_eq!(storage.count(&path).unwrap(), 2);
    }

    #[test]
    fn test_unwritable_location_is_storage_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = Storage::default()
            .insert(&blocker.join("aq.db"), &record("北京"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
