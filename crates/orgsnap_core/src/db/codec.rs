//! Column encodings shared by every repository.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Encodes an instant as UTC epoch milliseconds.
pub fn instant_to_db(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

/// Decodes UTC epoch milliseconds. `None` when out of chrono's range.
pub fn instant_from_db(value: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value).single()
}

pub fn date_to_db(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub fn date_from_db(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

/// Drops sub-millisecond precision so an instant survives a storage round trip.
pub fn truncate_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    instant_from_db(instant_to_db(value)).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_round_trips_at_millisecond_precision() {
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        assert_eq!(instant_from_db(instant_to_db(at)), Some(at));
    }

    #[test]
    fn truncation_removes_sub_millisecond_part() {
        let at = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let truncated = truncate_to_millis(at);
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn date_rejects_malformed_text() {
        assert!(date_from_db("1990-13-01").is_none());
        assert_eq!(
            date_from_db("1990-06-15"),
            NaiveDate::from_ymd_opt(1990, 6, 15)
        );
    }
}
