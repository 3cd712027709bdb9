//! Point-in-time snapshot capture.
//!
//! # Responsibility
//! - Read an employee and the employee's unit as of one instant and derive
//!   the immutable snapshot core.
//!
//! # Invariants
//! - Employee and unit are read from one consistent view: either both
//!   reflect a concurrent change or neither does.
//! - `snapshot_time`, age and tenure all derive from the same instant.
//! - Capture never writes.

use crate::config::SnapshotConfig;
use crate::db::DbError;
use crate::model::employee::EmployeeId;
use crate::model::org_unit::UnitId;
use crate::model::snapshot::{
    age_at, format_snapshot_time, tenure_at, version_id_for, Snapshot, SnapshotCore,
};
use crate::repo::employee_repo::{EmployeeState, SqliteEmployeeRepository};
use crate::repo::lineage_repo::{OrgState, SqliteLineageStore};
use crate::repo::state::StateError;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Debug)]
pub enum CaptureError {
    /// No employee record covers the capture instant.
    EmployeeNotFound(EmployeeId),
    /// The employee's unit has no version covering the capture instant.
    UnitNotFound(UnitId),
    State(StateError),
    Db(DbError),
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmployeeNotFound(_) | Self::UnitNotFound(_) => "not_found",
            Self::State(_) | Self::Db(_) => "storage_error",
        }
    }
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmployeeNotFound(id) => write!(f, "employee not found: {id}"),
            Self::UnitNotFound(id) => {
                write!(f, "employee unit `{id}` has no version at capture time")
            }
            Self::State(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CaptureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::State(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StateError> for CaptureError {
    fn from(value: StateError) -> Self {
        match value {
            StateError::EmployeeNotFound { employee_id, .. } => Self::EmployeeNotFound(employee_id),
            StateError::UnitNotFound { unit_id, .. } => Self::UnitNotFound(unit_id),
            StateError::Db(err) => Self::Db(err),
            other => Self::State(other),
        }
    }
}

impl From<DbError> for CaptureError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CaptureError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Derives snapshots from employee and organizational state readers.
pub struct SnapshotService<'a, E: ?Sized, O: ?Sized> {
    employees: &'a E,
    org: &'a O,
    format_version: &'a str,
}

impl<'a, E, O> SnapshotService<'a, E, O>
where
    E: EmployeeState + ?Sized,
    O: OrgState + ?Sized,
{
    pub fn new(employees: &'a E, org: &'a O, config: &'a SnapshotConfig) -> Self {
        Self {
            employees,
            org,
            format_version: &config.format_version,
        }
    }

    /// Captures the employee as of `at`.
    pub fn capture_at(&self, employee_id: &str, at: DateTime<Utc>) -> CaptureResult<Snapshot> {
        let employee = self.employees.get_at(employee_id, at)?;
        let unit = self.org.get_unit_at(&employee.unit_id, at)?;

        let core = SnapshotCore {
            employee_name: employee.name,
            employee_email: employee.email,
            department: unit.name,
            unit_id: unit.unit_id,
            unit_path: unit.path,
            performance_grade: employee.performance_grade,
            role: employee.role,
            age: age_at(employee.birth_date, at),
            tenure: tenure_at(employee.hire_date, at),
            snapshot_version: self.format_version.to_string(),
            snapshot_time: format_snapshot_time(at),
        };
        debug!(
            "event=snapshot_capture module=snapshot status=ok unit_id={}",
            core.unit_id
        );

        Ok(Snapshot {
            employee_id: employee.employee_id,
            version_id: version_id_for(employee_id, at),
            core,
            captured_at: at,
        })
    }
}

/// Captures `employee_id` as of `at` inside one read transaction on `conn`.
///
/// `conn` must not already be inside a transaction; callers that need the
/// capture to share a write transaction use [`SnapshotService`] directly.
pub fn capture_snapshot(
    conn: &Connection,
    employee_id: &str,
    at: DateTime<Utc>,
    config: &SnapshotConfig,
) -> CaptureResult<Snapshot> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
    let employees = SqliteEmployeeRepository::try_new(&tx)?;
    let org = SqliteLineageStore::on(&tx);
    let outcome = SnapshotService::new(&employees, &org, config).capture_at(employee_id, at);
    match outcome {
        Ok(snapshot) => {
            tx.commit()?;
            Ok(snapshot)
        }
        Err(err) => {
            warn!(
                "event=snapshot_capture module=snapshot status=error error_code={}",
                err.code()
            );
            Err(err)
        }
    }
}
