// src/io/serial/codec.rs
//
// Speed sensor ASCII line protocol decoder.
//
// Line shapes (after trimming):
//   Data:        CSV:<session_id:int>,<object_no:int>,<speed_kmh:float>
//   Diagnostics: any line containing "Initialized" or "Session ID"
//   Anything else is unrecognized text.

use std::fmt;

use super::framer::RawLine;

/// Prefix of the one structured line shape.
pub const CSV_PREFIX: &str = "CSV:";

/// Substrings marking device-initialization or session-start diagnostics.
pub const DIAGNOSTIC_MARKERS: [&str; 2] = ["Initialized", "Session ID"];

const CSV_FIELD_COUNT: usize = 3;

/// Why a line was not turned into a measurement. Only affects logging.
#[derive(Clone, Debug, PartialEq)]
pub enum UnrecognizedReason {
    /// The line matched no known shape (includes CSV lines with the wrong field count).
    DecodeMismatch(String),
    /// A CSV line had the right shape but a field failed validation.
    ValidationFailure(String),
}

impl fmt::Display for UnrecognizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnrecognizedReason::DecodeMismatch(detail) => write!(f, "decode mismatch: {}", detail),
            UnrecognizedReason::ValidationFailure(detail) => {
                write!(f, "validation failure: {}", detail)
            }
        }
    }
}

/// Typed result of decoding one line. Carries no identity and is never persisted.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedEvent {
    /// A candidate measurement, not yet persisted.
    Data {
        session_id: i64,
        object_no: i64,
        speed: f64,
    },
    /// Device diagnostic/status text.
    Info { text: String },
    /// A line that matched no known shape, or failed validation.
    Unrecognized {
        text: String,
        reason: UnrecognizedReason,
    },
}

impl DecodedEvent {
    fn mismatch(text: &str, detail: impl Into<String>) -> Self {
        DecodedEvent::Unrecognized {
            text: text.to_string(),
            reason: UnrecognizedReason::DecodeMismatch(detail.into()),
        }
    }

    fn invalid(text: &str, detail: impl Into<String>) -> Self {
        DecodedEvent::Unrecognized {
            text: text.to_string(),
            reason: UnrecognizedReason::ValidationFailure(detail.into()),
        }
    }
}

/// Decode one framed line.
///
/// Returns `None` only for lines that are empty after trimming. Every other
/// input yields exactly one event; malformed input becomes `Unrecognized`.
pub fn decode(line: &RawLine) -> Option<DecodedEvent> {
    decode_str(&line.text)
}

/// Decode a line given as text. See [`decode`].
pub fn decode_str(raw: &str) -> Option<DecodedEvent> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    if DIAGNOSTIC_MARKERS.iter().any(|m| line.contains(m)) {
        return Some(DecodedEvent::Info {
            text: line.to_string(),
        });
    }

    let Some(payload) = line.strip_prefix(CSV_PREFIX) else {
        return Some(DecodedEvent::mismatch(line, "unknown line shape"));
    };

    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != CSV_FIELD_COUNT {
        return Some(DecodedEvent::mismatch(
            line,
            format!("expected {} CSV fields, got {}", CSV_FIELD_COUNT, fields.len()),
        ));
    }

    let session_id = match parse_int(fields[0]) {
        Ok(v) => v,
        Err(e) => return Some(DecodedEvent::invalid(line, format!("session id: {}", e))),
    };
    let object_no = match parse_int(fields[1]) {
        Ok(v) => v,
        Err(e) => return Some(DecodedEvent::invalid(line, format!("object number: {}", e))),
    };
    let speed = match parse_speed(fields[2]) {
        Ok(v) => v,
        Err(e) => return Some(DecodedEvent::invalid(line, format!("speed: {}", e))),
    };

    Some(DecodedEvent::Data {
        session_id,
        object_no,
        speed,
    })
}

/// Whole-token integer parse. `12abc` and the empty string are rejected.
fn parse_int(field: &str) -> Result<i64, String> {
    let token = field.trim();
    token
        .parse::<i64>()
        .map_err(|_| format!("'{}' is not an integer", token))
}

/// Whole-token decimal parse with a '.' separator. Rejects NaN, infinities
/// and negative values.
fn parse_speed(field: &str) -> Result<f64, String> {
    let token = field.trim();
    // Rust's float parser accepts "inf"/"NaN" spellings; the device never sends them.
    if !token
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
    {
        return Err(format!("'{}' is not a number", token));
    }
    let speed = token
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a number", token))?;
    if !speed.is_finite() {
        return Err(format!("'{}' is not finite", token));
    }
    if speed < 0.0 {
        return Err(format!("{} is negative", token));
    }
    Ok(speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(session_id: i64, object_no: i64, speed: f64) -> Option<DecodedEvent> {
        Some(DecodedEvent::Data {
            session_id,
            object_no,
            speed,
        })
    }

    fn is_mismatch(event: Option<DecodedEvent>) -> bool {
        matches!(
            event,
            Some(DecodedEvent::Unrecognized {
                reason: UnrecognizedReason::DecodeMismatch(_),
                ..
            })
        )
    }

    fn is_invalid(event: Option<DecodedEvent>) -> bool {
        matches!(
            event,
            Some(DecodedEvent::Unrecognized {
                reason: UnrecognizedReason::ValidationFailure(_),
                ..
            })
        )
    }

    #[test]
    fn test_decode_data_line() {
        assert_eq!(decode_str("CSV:3,7,42.5"), data(3, 7, 42.5));
    }

    #[test]
    fn test_decode_trims_line_and_fields() {
        assert_eq!(decode_str("  CSV:3, 7 ,42.5\r"), data(3, 7, 42.5));
        assert_eq!(decode(&RawLine::new("CSV:0,1,0\r")), data(0, 1, 0.0));
    }

    #[test]
    fn test_decode_empty_line_emits_nothing() {
        assert_eq!(decode_str(""), None);
        assert_eq!(decode_str("   \r"), None);
    }

    #[test]
    fn test_decode_diagnostics() {
        assert_eq!(
            decode_str("Speed sensor Initialized\r"),
            Some(DecodedEvent::Info {
                text: "Speed sensor Initialized".to_string()
            })
        );
        assert!(matches!(
            decode_str("New Session ID: 4"),
            Some(DecodedEvent::Info { .. })
        ));
    }

    #[test]
    fn test_diagnostic_marker_wins_over_csv_prefix() {
        assert!(matches!(
            decode_str("CSV:Session ID,1,2"),
            Some(DecodedEvent::Info { .. })
        ));
    }

    #[test]
    fn test_decode_wrong_field_count() {
        assert!(is_mismatch(decode_str("CSV:3,7")));
        assert!(is_mismatch(decode_str("CSV:3,7,42.5,1")));
        assert!(is_mismatch(decode_str("CSV:")));
    }

    #[test]
    fn test_decode_non_numeric_field() {
        assert!(is_invalid(decode_str("CSV:a,7,42.5")));
        assert!(is_invalid(decode_str("CSV:3,b,42.5")));
        assert!(is_invalid(decode_str("CSV:3,7,fast")));
        assert!(is_invalid(decode_str("CSV:3,7,")));
    }

    #[test]
    fn test_decode_rejects_partial_numeric_parse() {
        assert!(is_invalid(decode_str("CSV:12abc,7,42.5")));
        assert!(is_invalid(decode_str("CSV:3,7,42.5km")));
        assert!(is_invalid(decode_str("CSV:3.5,7,42.5")));
    }

    #[test]
    fn test_decode_rejects_comma_decimal_and_non_finite() {
        // A comma decimal separator changes the field count
        assert!(is_mismatch(decode_str("CSV:3,7,42,5")));
        assert!(is_invalid(decode_str("CSV:3,7,NaN")));
        assert!(is_invalid(decode_str("CSV:3,7,inf")));
        assert!(is_invalid(decode_str("CSV:3,7,1e999")));
    }

    #[test]
    fn test_decode_rejects_negative_speed() {
        assert!(is_invalid(decode_str("CSV:3,7,-1.5")));
    }

    #[test]
    fn test_decode_accepts_negative_ids_and_exponent() {
        assert_eq!(decode_str("CSV:-1,7,1.5e1"), data(-1, 7, 15.0));
    }

    #[test]
    fn test_decode_other_text() {
        assert!(is_mismatch(decode_str("hello world")));
        assert!(is_mismatch(decode_str("csv:1,2,3")));
        assert!(is_mismatch(decode_str("DATA:1,2,3")));
    }

    #[test]
    fn test_reason_display() {
        let reason = UnrecognizedReason::ValidationFailure("speed: 'x' is not a number".into());
        assert_eq!(reason.to_string(), "validation failure: speed: 'x' is not a number");
    }
}
