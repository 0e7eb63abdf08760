// src/export.rs
//
// CSV export of stored speed records.

use std::io::Write;

use crate::record::SpeedRecord;

const HEADER: [&str; 5] = ["Session ID", "Object No", "Speed (km/h)", "Date", "Time"];

/// Quote a field if it contains a separator, quote or line break.
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write `records` as CSV, one row per record in the order given.
/// Returns the number of data rows written.
pub fn write_csv<W: Write>(mut out: W, records: &[SpeedRecord]) -> std::io::Result<usize> {
    writeln!(out, "{}", HEADER.join(","))?;
    for record in records {
        writeln!(
            out,
            "{},{},{:.2},{},{}",
            record.session_id,
            record.object_no,
            record.speed,
            escape_field(&record.date),
            escape_field(&record.time)
        )?;
    }
    out.flush()?;
    Ok(records.len())
}

/// Default export file name for today, e.g. `speed_records_2024-03-09.csv`.
pub fn default_file_name() -> String {
    format!("speed_records_{}.csv", chrono::Local::now().format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewRecord;
    use chrono::{Local, TimeZone};

    #[test]
    fn test_write_csv() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap();
        let records = vec![
            SpeedRecord::from_new(1, &NewRecord::stamped_at(3, 7, 42.5, at)),
            SpeedRecord::from_new(2, &NewRecord::stamped_at(3, 8, 9.999, at)),
        ];
        let mut buf = Vec::new();
        assert_eq!(write_csv(&mut buf, &records).unwrap(), 2);
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "Session ID,Object No,Speed (km/h),Date,Time\n\
             3,7,42.50,09/03/2024,14:30:05\n\
             3,8,10.00,09/03/2024,14:30:05\n"
        );
    }

    #[test]
    fn test_empty_export_has_header() {
        let mut buf = Vec::new();
        assert_eq!(write_csv(&mut buf, &[]).unwrap(), 0);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "Session ID,Object No,Speed (km/h),Date,Time\n"
        );
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_default_file_name() {
        let name = default_file_name();
        assert!(name.starts_with("speed_records_"));
        assert!(name.ends_with(".csv"));
    }
}
