// src/record.rs
//
// Speed record types: the candidate built at ingestion time and the
// persisted row returned by the store.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

/// Date stamp format (day/month/year), independent of the host locale.
pub const DATE_FORMAT: &str = "%d/%m/%Y";
/// Time-of-day stamp format, 24 hour clock.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// A measurement that passed decoding and is about to be appended.
#[derive(Clone, Debug, PartialEq)]
pub struct NewRecord {
    pub session_id: i64,
    pub object_no: i64,
    pub speed: f64,
    pub date: String,
    pub time: String,
    pub recorded_at: DateTime<Utc>,
}

impl NewRecord {
    /// Build a candidate stamped with the current wall clock.
    pub fn stamped_now(session_id: i64, object_no: i64, speed: f64) -> Self {
        Self::stamped_at(session_id, object_no, speed, Local::now())
    }

    /// Build a candidate stamped with `at` (local time for date/time strings).
    pub fn stamped_at(session_id: i64, object_no: i64, speed: f64, at: DateTime<Local>) -> Self {
        NewRecord {
            session_id,
            object_no,
            speed,
            date: at.format(DATE_FORMAT).to_string(),
            time: at.format(TIME_FORMAT).to_string(),
            recorded_at: at.with_timezone(&Utc),
        }
    }
}

/// One observed passage of an object past the sensor, as persisted.
/// Immutable once stored; the only mutation is deletion.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedRecord {
    pub id: i64,
    pub session_id: i64,
    pub object_no: i64,
    pub speed: f64,
    pub date: String,
    pub time: String,
    #[serde(skip)]
    pub recorded_at: DateTime<Utc>,
}

impl SpeedRecord {
    pub(crate) fn from_new(id: i64, new: &NewRecord) -> Self {
        SpeedRecord {
            id,
            session_id: new.session_id,
            object_no: new.object_no,
            speed: new.speed,
            date: new.date.clone(),
            time: new.time.clone(),
            recorded_at: new.recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stamps_are_locale_independent() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
        let rec = NewRecord::stamped_at(1, 2, 3.5, at);
        assert_eq!(rec.date, "09/03/2024");
        assert_eq!(rec.time, "07:05:02");
        assert_eq!(rec.recorded_at, at.with_timezone(&Utc));
    }

    #[test]
    fn test_record_json_uses_camel_case() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 17, 0, 0).unwrap();
        let rec = SpeedRecord::from_new(7, &NewRecord::stamped_at(3, 4, 12.25, at));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["sessionId"], 3);
        assert_eq!(json["objectNo"], 4);
        assert_eq!(json["speed"], 12.25);
        assert!(json.get("recordedAt").is_none());
    }
}
