//! Chat message types

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// One stored conversational turn
///
/// Only the store constructs these; `message_id` and `timestamp` are
/// assigned at insert time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Row id, strictly increasing and never reused
    pub message_id: i64,
    /// Conversation owner
    pub user_id: String,
    /// Message text, already formatted by the caller
    pub message: String,
    /// Insert time
    pub timestamp: DateTime<Utc>,
}

/// Truncate to the precision kept in the database
pub(crate) fn stored_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that text order matches time order
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
///
/// Rows written as naive ISO-8601 (no offset) are read as UTC.
pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(e) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .map(|naive| naive.and_utc())
            .map_err(|_| e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_encode_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let fractional = whole.with_nanosecond(120_000).unwrap();

        assert_eq!(encode_timestamp(&whole), "2026-01-02T03:04:05.000000Z");
        assert_eq!(encode_timestamp(&fractional), "2026-01-02T03:04:05.000120Z");
        assert!(encode_timestamp(&whole) < encode_timestamp(&fractional));
    }

    #[test]
    fn test_decode_roundtrip() {
        let ts = stored_precision(Utc::now());
        assert_eq!(decode_timestamp(&encode_timestamp(&ts)).unwrap(), ts);
    }

    #[test]
    fn test_decode_naive_iso() {
        let with_fraction = decode_timestamp("2025-06-17T10:11:12.345678").unwrap();
        assert_eq!(with_fraction.nanosecond(), 345_678_000);

        let without_fraction = decode_timestamp("2025-06-17T10:11:12").unwrap();
        assert_eq!(
            without_fraction,
            Utc.with_ymd_and_hms(2025, 6, 17, 10, 11, 12).unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_message_json_shape() {
        let msg = ChatMessage {
            message_id: 7,
            user_id: "u1".to_string(),
            message: "User: hi".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["message_id"], 7);
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["message"], "User: hi");
        assert_eq!(value["timestamp"], "2026-01-02T03:04:05Z");
    }
}
