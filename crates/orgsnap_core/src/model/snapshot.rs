//! Immutable snapshot payload and its derived-field arithmetic.
//!
//! # Invariants
//! - The `SnapshotCore` key set is fixed; its serialized form is the exact
//!   byte payload persisted with a response.
//! - `version_id` is a pure function of `(employee_id, captured_at)`.

use crate::model::employee::EmployeeId;
use crate::model::org_unit::UnitId;
use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const MILLIS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0 * 1000.0;

/// Core attributes captured at submission time.
///
/// Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCore {
    pub employee_name: String,
    pub employee_email: String,
    /// Unit name verbatim as of capture.
    pub department: String,
    pub unit_id: UnitId,
    pub unit_path: String,
    pub performance_grade: String,
    pub role: String,
    pub age: i32,
    pub tenure: f64,
    pub snapshot_version: String,
    /// RFC 3339, millisecond precision, UTC.
    pub snapshot_time: String,
}

impl SnapshotCore {
    /// Serialized payload as stored in `survey_responses.snapshot_core`.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Result of one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub employee_id: EmployeeId,
    pub core: SnapshotCore,
    pub version_id: String,
    pub captured_at: DateTime<Utc>,
}

/// Whole years between `birth_date` and `at`, minus one when this year's
/// birthday has not been reached yet.
pub fn age_at(birth_date: NaiveDate, at: DateTime<Utc>) -> i32 {
    let on = at.date_naive();
    let mut age = on.year() - birth_date.year();
    if (on.month(), on.day()) < (birth_date.month(), birth_date.day()) {
        age -= 1;
    }
    age
}

/// Years of service between `hire_date` (midnight UTC) and `at`, truncated
/// to one decimal place.
pub fn tenure_at(hire_date: NaiveDate, at: DateTime<Utc>) -> f64 {
    let hired_at = hire_date.and_time(chrono::NaiveTime::default()).and_utc();
    let years = (at - hired_at).num_milliseconds() as f64 / MILLIS_PER_YEAR;
    (years * 10.0).trunc() / 10.0
}

/// Correlation key for extended historical attributes stored elsewhere.
pub fn version_id_for(employee_id: &str, at: DateTime<Utc>) -> String {
    format!("{employee_id}_{}", at.timestamp())
}

pub fn format_snapshot_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn instant(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn age_subtracts_one_before_birthday() {
        assert_eq!(age_at(date(1990, 6, 15), instant(2024, 3, 1)), 33);
        assert_eq!(age_at(date(1990, 6, 15), instant(2024, 7, 1)), 34);
    }

    #[test]
    fn age_counts_birthday_itself_as_reached() {
        assert_eq!(age_at(date(1990, 1, 1), instant(2024, 1, 1)), 34);
        assert_eq!(age_at(date(1990, 6, 15), instant(2024, 6, 15)), 34);
    }

    #[test]
    fn age_is_not_shifted_by_leap_day_ordinals() {
        // 2024-06-14 has the same day-of-year as a non-leap June 15.
        assert_eq!(age_at(date(1990, 6, 15), instant(2024, 6, 14)), 33);
    }

    #[test]
    fn tenure_truncates_to_one_decimal() {
        let tenure = tenure_at(date(2019, 6, 1), instant(2024, 3, 15));
        assert_eq!(tenure, 4.7);
        assert_eq!(tenure_at(date(2024, 3, 15), instant(2024, 3, 15)), 0.0);
    }

    #[test]
    fn version_id_is_reproducible() {
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        assert_eq!(version_id_for("emp_123", at), version_id_for("emp_123", at));
        assert_eq!(version_id_for("emp_123", at), format!("emp_123_{}", at.timestamp()));
    }

    #[test]
    fn payload_keys_follow_fixed_layout() {
        let core = SnapshotCore {
            employee_name: "John Doe".to_string(),
            employee_email: "john.doe@example.com".to_string(),
            department: "Sales APAC".to_string(),
            unit_id: "unit_123".to_string(),
            unit_path: "root.apac.sales".to_string(),
            performance_grade: "A".to_string(),
            role: "Senior Manager".to_string(),
            age: 35,
            tenure: 4.7,
            snapshot_version: "1.0".to_string(),
            snapshot_time: format_snapshot_time(instant(2024, 3, 15)),
        };
        let payload = core.to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys.len(), 11);
        assert!(keys.contains(&"department"));
        assert!(keys.contains(&"snapshot_time"));
        assert_eq!(SnapshotCore::from_payload(&payload).unwrap(), core);
    }
}
