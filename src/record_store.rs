// src/record_store.rs
//
// Record store interface consumed by the ingestion pipeline and the CLI.
// The SQLite implementation lives in record_db.rs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::record::{NewRecord, SpeedRecord};

/// Ordering of query results by insertion id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// Per-session aggregate.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: i64,
    pub count: u64,
    pub avg_speed: f64,
    pub max_speed: f64,
}

/// Aggregates over every stored record. Speeds are rounded to two decimals;
/// all zero when the store is empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_records: u64,
    pub average_speed: f64,
    pub max_speed: f64,
    pub min_speed: f64,
    pub sessions: Vec<SessionStats>,
}

/// Flat record table. Records are append-only; deletions report affected rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a record and return it with its assigned id.
    async fn append(&self, record: &NewRecord) -> Result<SpeedRecord, StoreError>;

    /// Up to `limit` records in the given order.
    async fn query(&self, limit: usize, order: RecordOrder) -> Result<Vec<SpeedRecord>, StoreError>;

    async fn delete_by_id(&self, id: i64) -> Result<usize, StoreError>;

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, StoreError>;

    /// Delete every record ingested strictly before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn delete_all(&self) -> Result<usize, StoreError>;

    async fn statistics(&self) -> Result<Statistics, StoreError>;
}

/// Round to two decimals, as shown on the dashboard.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(42.456), 42.46);
        assert_eq!(round2(10.0 / 3.0), 3.33);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_statistics_json_shape() {
        let stats = Statistics {
            total_records: 1,
            average_speed: 5.0,
            max_speed: 5.0,
            min_speed: 5.0,
            sessions: vec![SessionStats {
                session_id: 2,
                count: 1,
                avg_speed: 5.0,
                max_speed: 5.0,
            }],
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalRecords"], 1);
        assert_eq!(json["sessions"][0]["sessionId"], 2);
        assert_eq!(json["sessions"][0]["avgSpeed"], 5.0);
    }
}
