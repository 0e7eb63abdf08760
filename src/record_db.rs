// src/record_db.rs
//
// SQLite-backed record store.
//
// rusqlite::Connection is !Sync, so it sits behind a Mutex and every call
// runs on the blocking pool to keep the async pipeline responsive.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::record::{NewRecord, SpeedRecord};
use crate::record_store::{round2, RecordOrder, RecordStore, SessionStats, Statistics};

// session_id defaults to 0 for rows written without one.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS speed_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER DEFAULT 0,
    object_no INTEGER NOT NULL,
    speed REAL NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_speed_records_recorded_at ON speed_records (recorded_at);
";

const SELECT_COLUMNS: &str = "id, session_id, object_no, speed, date, time, recorded_at";

/// Record store over a single SQLite connection.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database file at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;

        // WAL mode so CLI reads don't block the running service
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        // Synchronous NORMAL is safe with WAL and faster than FULL
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;

        let store = Self::with_connection(conn)?;
        tlog!("[store] Opened {:?}", db_path);
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(SqliteRecordStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("connection mutex poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

fn format_instant(at: &DateTime<Utc>) -> String {
    // Fixed width so the text column sorts chronologically
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SpeedRecord> {
    let session_id: Option<i64> = row.get("session_id")?;
    let recorded_at: String = row.get("recorded_at")?;
    let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(SpeedRecord {
        id: row.get("id")?,
        session_id: session_id.unwrap_or(0),
        object_no: row.get("object_no")?,
        speed: row.get("speed")?,
        date: row.get("date")?,
        time: row.get("time")?,
        recorded_at,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn append(&self, record: &NewRecord) -> Result<SpeedRecord, StoreError> {
        let record = record.clone();
        self.run(move |conn| {
            conn.prepare_cached(
                "INSERT INTO speed_records (session_id, object_no, speed, date, time, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![
                record.session_id,
                record.object_no,
                record.speed,
                &record.date,
                &record.time,
                format_instant(&record.recorded_at),
            ])?;
            let id = conn.last_insert_rowid();
            Ok(SpeedRecord::from_new(id, &record))
        })
        .await
    }

    async fn query(&self, limit: usize, order: RecordOrder) -> Result<Vec<SpeedRecord>, StoreError> {
        self.run(move |conn| {
            let direction = match order {
                RecordOrder::OldestFirst => "ASC",
                RecordOrder::NewestFirst => "DESC",
            };
            let sql = format!(
                "SELECT {} FROM speed_records ORDER BY id {} LIMIT ?1",
                SELECT_COLUMNS, direction
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt.query_map(params![limit], row_to_record)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
    }

    async fn delete_by_id(&self, id: i64) -> Result<usize, StoreError> {
        self.run(move |conn| Ok(conn.execute("DELETE FROM speed_records WHERE id = ?1", params![id])?))
            .await
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        self.run(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!("DELETE FROM speed_records WHERE id IN ({})", placeholders);
            Ok(conn.execute(&sql, params_from_iter(ids.iter()))?)
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = format_instant(&cutoff);
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM speed_records WHERE recorded_at < ?1",
                params![cutoff],
            )?)
        })
        .await
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        self.run(|conn| Ok(conn.execute("DELETE FROM speed_records", [])?))
            .await
    }

    async fn statistics(&self) -> Result<Statistics, StoreError> {
        self.run(|conn| {
            let (total, avg, max, min): (i64, Option<f64>, Option<f64>, Option<f64>) = conn
                .query_row(
                    "SELECT COUNT(*), AVG(speed), MAX(speed), MIN(speed) FROM speed_records",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;

            let mut stmt = conn.prepare_cached(
                "SELECT COALESCE(session_id, 0) AS sid, COUNT(*), AVG(speed), MAX(speed)
                 FROM speed_records GROUP BY sid ORDER BY sid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SessionStats {
                    session_id: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    avg_speed: round2(row.get(2)?),
                    max_speed: round2(row.get(3)?),
                })
            })?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row?);
            }

            Ok(Statistics {
                total_records: total as u64,
                average_speed: avg.map(round2).unwrap_or(0.0),
                max_speed: max.map(round2).unwrap_or(0.0),
                min_speed: min.map(round2).unwrap_or(0.0),
                sessions,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local, TimeZone};

    fn rec(session_id: i64, object_no: i64, speed: f64) -> NewRecord {
        NewRecord::stamped_now(session_id, object_no, speed)
    }

    #[tokio::test]
    async fn test_append_then_query_round_trip() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let stored = store.append(&rec(3, 7, 42.5)).await.unwrap();

        let records = store.query(100, RecordOrder::OldestFirst).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, stored.id);
        assert_eq!(records[0].session_id, 3);
        assert_eq!(records[0].object_no, 7);
        assert_eq!(records[0].speed, 42.5);
        assert_eq!(records[0].date, stored.date);
        assert_eq!(records[0].time, stored.time);
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_ordering() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.append(&rec(1, i, i as f64)).await.unwrap().id);
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let oldest = store.query(2, RecordOrder::OldestFirst).await.unwrap();
        assert_eq!(oldest.iter().map(|r| r.object_no).collect::<Vec<_>>(), vec![0, 1]);

        let newest = store.query(2, RecordOrder::NewestFirst).await.unwrap();
        assert_eq!(newest.iter().map(|r| r.object_no).collect::<Vec<_>>(), vec![4, 3]);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let first = store.append(&rec(1, 1, 1.0)).await.unwrap();
        store.delete_all().await.unwrap();
        let second = store.append(&rec(1, 2, 1.0)).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_delete_variants_report_counts() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(store.append(&rec(1, i, 10.0)).await.unwrap().id);
        }

        assert_eq!(store.delete_by_id(ids[0]).await.unwrap(), 1);
        assert_eq!(store.delete_by_id(ids[0]).await.unwrap(), 0);
        assert_eq!(store.delete_by_ids(&[ids[1], ids[2], 9999]).await.unwrap(), 2);
        assert_eq!(store.delete_by_ids(&[]).await.unwrap(), 0);
        assert_eq!(store.delete_all().await.unwrap(), 3);
        assert!(store.query(10, RecordOrder::OldestFirst).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_older_than_cutoff() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let now = Local::now();
        let old = NewRecord::stamped_at(1, 1, 5.0, now - Duration::days(10));
        let fresh = NewRecord::stamped_at(1, 2, 6.0, now);
        store.append(&old).await.unwrap();
        store.append(&fresh).await.unwrap();

        let cutoff = (now - Duration::days(7)).with_timezone(&Utc);
        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 1);

        let left = store.query(10, RecordOrder::OldestFirst).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].object_no, 2);
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        assert_eq!(store.statistics().await.unwrap(), Statistics::default());

        store.append(&rec(1, 1, 10.0)).await.unwrap();
        store.append(&rec(1, 2, 20.0)).await.unwrap();
        store.append(&rec(2, 1, 33.333)).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.average_speed, 21.11);
        assert_eq!(stats.max_speed, 33.33);
        assert_eq!(stats.min_speed, 10.0);
        assert_eq!(
            stats.sessions,
            vec![
                SessionStats {
                    session_id: 1,
                    count: 2,
                    avg_speed: 15.0,
                    max_speed: 20.0,
                },
                SessionStats {
                    session_id: 2,
                    count: 1,
                    avg_speed: 33.33,
                    max_speed: 33.33,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_session_id_reads_as_zero() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO speed_records (session_id, object_no, speed, date, time, recorded_at)
                 VALUES (NULL, 5, 12.0, '01/01/2024', '10:00:00', '2024-01-01T10:00:00.000000Z')",
                [],
            )
            .unwrap();
            let stored: Option<i64> = conn
                .query_row("SELECT session_id FROM speed_records", [], |row| row.get(0))
                .unwrap();
            assert_eq!(stored, None);
        }
        store.append(&rec(0, 6, 14.0)).await.unwrap();

        let records = store.query(10, RecordOrder::OldestFirst).await.unwrap();
        assert_eq!(records[0].session_id, 0);
        assert_eq!(
            records[0].recorded_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );

        assert_eq!(records[1].session_id, 0);

        // NULL and explicit 0 land in the same session bucket
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.sessions.len(), 1);
        assert_eq!(stats.sessions[0].session_id, 0);
        assert_eq!(stats.sessions[0].count, 2);
        assert_eq!(stats.sessions[0].max_speed, 14.0);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("speed.db");
        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.append(&rec(4, 1, 8.5)).await.unwrap();
        }
        let reopened = SqliteRecordStore::open(&path).unwrap();
        let records = reopened.query(10, RecordOrder::OldestFirst).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].speed, 8.5);
    }
}
