//! Point-in-time employee records.
//!
//! # Responsibility
//! - Serve the employee record current now or at a past instant.
//! - Record new attribute versions, closing the previous one.
//!
//! # Invariants
//! - At most one open version per employee.
//! - Versions of one employee are contiguous: a new version closes the
//!   previous open version exactly where it starts.

use crate::db::codec::{date_from_db, date_to_db, instant_from_db, instant_to_db};
use crate::db::migrations::ensure_current;
use crate::model::employee::EmployeeVersion;
use crate::repo::state::{StateError, StateResult};
use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

/// Read access to employee state.
pub trait EmployeeState {
    /// The currently open record.
    fn get_by_id(&self, employee_id: &str) -> StateResult<EmployeeVersion>;
    /// The record covering `at`.
    fn get_at(&self, employee_id: &str, at: DateTime<Utc>) -> StateResult<EmployeeVersion>;
}

/// SQLite-backed employee state.
pub struct SqliteEmployeeRepository<'conn> {
    conn: &'conn Connection,
}

const EMPLOYEE_COLUMNS: &str = "employee_id,
    name,
    email,
    unit_id,
    performance_grade,
    role,
    birth_date,
    hire_date,
    valid_from,
    valid_to";

impl<'conn> SqliteEmployeeRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> StateResult<Self> {
        ensure_current(conn)?;
        Ok(Self { conn })
    }

    /// Records a new version; the open version, if any, is closed at
    /// `version.valid_from`.
    pub fn record_employee_version(&self, version: &EmployeeVersion) -> StateResult<()> {
        version.validate()?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let latest_from: Option<i64> = tx
            .query_row(
                "SELECT MAX(valid_from) FROM employee_versions WHERE employee_id = ?1;",
                [&version.employee_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        if latest_from.is_some_and(|latest| latest >= instant_to_db(version.valid_from)) {
            return Err(StateError::VersionOutOfOrder {
                employee_id: version.employee_id.clone(),
                valid_from: version.valid_from,
            });
        }

        tx.execute(
            "UPDATE employee_versions
             SET valid_to = ?2
             WHERE employee_id = ?1 AND valid_to IS NULL;",
            params![version.employee_id, instant_to_db(version.valid_from)],
        )?;
        tx.execute(
            "INSERT INTO employee_versions (
                employee_id,
                name,
                email,
                unit_id,
                performance_grade,
                role,
                birth_date,
                hire_date,
                valid_from,
                valid_to
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                version.employee_id,
                version.name,
                version.email,
                version.unit_id,
                version.performance_grade,
                version.role,
                date_to_db(version.birth_date),
                date_to_db(version.hire_date),
                instant_to_db(version.valid_from),
                version.valid_to.map(instant_to_db),
            ],
        )?;
        tx.commit()?;

        info!(
            "event=employee_version_record module=employee_repo status=ok unit_id={}",
            version.unit_id
        );
        Ok(())
    }
}

impl EmployeeState for SqliteEmployeeRepository<'_> {
    fn get_by_id(&self, employee_id: &str) -> StateResult<EmployeeVersion> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {EMPLOYEE_COLUMNS}
                     FROM employee_versions
                     WHERE employee_id = ?1 AND valid_to IS NULL;"
                ),
                [employee_id],
                |row| Ok(parse_employee_row(row)),
            )
            .optional()?;
        found.unwrap_or_else(|| {
            Err(StateError::EmployeeNotFound {
                employee_id: employee_id.to_string(),
                at: None,
            })
        })
    }

    fn get_at(&self, employee_id: &str, at: DateTime<Utc>) -> StateResult<EmployeeVersion> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {EMPLOYEE_COLUMNS}
                     FROM employee_versions
                     WHERE employee_id = ?1
                       AND valid_from <= ?2
                       AND (valid_to IS NULL OR valid_to > ?2);"
                ),
                params![employee_id, instant_to_db(at)],
                |row| Ok(parse_employee_row(row)),
            )
            .optional()?;
        found.unwrap_or_else(|| {
            Err(StateError::EmployeeNotFound {
                employee_id: employee_id.to_string(),
                at: Some(at),
            })
        })
    }
}

fn parse_employee_row(row: &Row<'_>) -> StateResult<EmployeeVersion> {
    Ok(EmployeeVersion {
        employee_id: row.get("employee_id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        unit_id: row.get("unit_id")?,
        performance_grade: row.get("performance_grade")?,
        role: row.get("role")?,
        birth_date: parse_date(&row.get::<_, String>("birth_date")?, "birth_date")?,
        hire_date: parse_date(&row.get::<_, String>("hire_date")?, "hire_date")?,
        valid_from: parse_instant(row.get("valid_from")?, "valid_from")?,
        valid_to: row
            .get::<_, Option<i64>>("valid_to")?
            .map(|value| parse_instant(value, "valid_to"))
            .transpose()?,
    })
}

fn parse_date(value: &str, column: &'static str) -> StateResult<NaiveDate> {
    date_from_db(value).ok_or_else(|| {
        StateError::InvalidData(format!(
            "invalid date `{value}` in employee_versions.{column}"
        ))
    })
}

fn parse_instant(value: i64, column: &'static str) -> StateResult<DateTime<Utc>> {
    instant_from_db(value).ok_or_else(|| {
        StateError::InvalidData(format!(
            "invalid instant `{value}` in employee_versions.{column}"
        ))
    })
}
