//! Errors and lookup results shared by point-in-time state readers.

use crate::db::DbError;
use crate::model::employee::EmployeeId;
use crate::model::org_unit::UnitId;
use crate::model::validation::ValidationError;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StateResult<T> = Result<T, StateError>;

/// Point-in-time read/write failure for employee and unit state.
#[derive(Debug)]
pub enum StateError {
    Db(DbError),
    /// No employee record covers the requested instant. `at = None` means
    /// no current record.
    EmployeeNotFound {
        employee_id: EmployeeId,
        at: Option<DateTime<Utc>>,
    },
    /// No unit version covers the requested instant.
    UnitNotFound {
        unit_id: UnitId,
        at: DateTime<Utc>,
    },
    Validation(ValidationError),
    /// New version does not start after the latest recorded one.
    VersionOutOfOrder {
        employee_id: EmployeeId,
        valid_from: DateTime<Utc>,
    },
    InvalidData(String),
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EmployeeNotFound { .. } | Self::UnitNotFound { .. }
        )
    }
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::EmployeeNotFound {
                employee_id,
                at: Some(at),
            } => write!(f, "employee not found: {employee_id} at {at}"),
            Self::EmployeeNotFound {
                employee_id,
                at: None,
            } => write!(f, "employee not found: {employee_id}"),
            Self::UnitNotFound { unit_id, at } => {
                write!(f, "organizational unit not found: {unit_id} at {at}")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::VersionOutOfOrder {
                employee_id,
                valid_from,
            } => write!(
                f,
                "employee {employee_id} version at {valid_from} does not follow the latest version"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted state: {message}"),
        }
    }
}

impl Error for StateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StateError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StateError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ValidationError> for StateError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Outcome of mapping a unit name to an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitLookup {
    Found(UnitId),
    NotFound,
    /// Several distinct units carry the name within the window; sorted.
    Ambiguous(Vec<UnitId>),
}
