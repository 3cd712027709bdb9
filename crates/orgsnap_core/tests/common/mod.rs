#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use orgsnap_core::config::SnapshotConfig;
use orgsnap_core::model::employee::EmployeeVersion;
use orgsnap_core::model::org_unit::OrgUnitVersion;
use orgsnap_core::repo::employee_repo::SqliteEmployeeRepository;
use orgsnap_core::{
    OrgChangeService, OrgRestructure, ResponseService, SubmissionReceipt, SubmitRequest,
};
use rusqlite::Connection;
use serde_json::json;

pub const TENANT: &str = "acme";

pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn ts_hm(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub fn unit(id: &str, name: &str, path: &str, from: DateTime<Utc>) -> OrgUnitVersion {
    OrgUnitVersion::new(id, name, path, from)
}

pub fn employee(id: &str, unit_id: &str, from: DateTime<Utc>) -> EmployeeVersion {
    EmployeeVersion {
        employee_id: id.to_string(),
        name: "Ana Lima".to_string(),
        email: format!("{id}@example.com"),
        unit_id: unit_id.to_string(),
        performance_grade: "A".to_string(),
        role: "Manager".to_string(),
        birth_date: NaiveDate::from_ymd_opt(1990, 6, 15).unwrap(),
        hire_date: NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(),
        valid_from: from,
        valid_to: None,
    }
}

pub fn record_unit(conn: &Connection, unit: &OrgUnitVersion) {
    OrgChangeService::new(conn).record_unit_version(unit).unwrap();
}

pub fn record_employee(conn: &Connection, version: &EmployeeVersion) {
    SqliteEmployeeRepository::try_new(conn)
        .unwrap()
        .record_employee_version(version)
        .unwrap();
}

/// `unit_123` "Sales APAC" since 2020 with `emp_1` as its member.
pub fn seed_sales_apac(conn: &Connection) {
    record_unit(
        conn,
        &unit("unit_123", "Sales APAC", "root.apac.sales", ts(2020, 1, 1)),
    );
    record_employee(conn, &employee("emp_1", "unit_123", ts(2020, 1, 1)));
}

/// Renames `unit_123` to "Revenue APAC" effective 2024-06-01.
pub fn rename_to_revenue(conn: &Connection) {
    OrgChangeService::new(conn)
        .record_organizational_change(&OrgRestructure::rename(
            "unit_123",
            "Revenue APAC",
            "root.apac.revenue",
            ts(2024, 6, 1),
        ))
        .unwrap();
}

/// Splits `unit_123` into "SEA Sales" and "ANZ Sales" effective 2024-09-01.
pub fn split_into_regions(conn: &Connection) {
    OrgChangeService::new(conn)
        .record_organizational_change(&OrgRestructure::split(
            "unit_123",
            vec![
                unit("unit_456", "SEA Sales", "root.apac.sea", ts(2024, 9, 1)),
                unit("unit_457", "ANZ Sales", "root.apac.anz", ts(2024, 9, 1)),
            ],
            ts(2024, 9, 1),
        ))
        .unwrap();
}

pub fn submit_at(
    conn: &Connection,
    employee_id: &str,
    tenant_id: &str,
    at: DateTime<Utc>,
) -> SubmissionReceipt {
    let config = SnapshotConfig::default();
    ResponseService::new(conn, &config)
        .submit_response_at(&request(employee_id, tenant_id), at)
        .unwrap()
}

pub fn request(employee_id: &str, tenant_id: &str) -> SubmitRequest {
    SubmitRequest {
        survey_id: "engagement_2024".to_string(),
        employee_id: employee_id.to_string(),
        tenant_id: tenant_id.to_string(),
        answers: json!({"q1": 4, "q2": "more focus time"}),
    }
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}
