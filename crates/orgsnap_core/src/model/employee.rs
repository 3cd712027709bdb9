//! Point-in-time employee attribute versions.

use crate::model::org_unit::UnitId;
use crate::model::validation::{
    check_identifier, check_interval, check_not_blank, ValidationError,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stable employee identifier.
pub type EmployeeId = String;

/// Employee attributes valid over `[valid_from, valid_to)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeVersion {
    pub employee_id: EmployeeId,
    pub name: String,
    pub email: String,
    /// Unit membership during this version.
    pub unit_id: UnitId,
    pub performance_grade: String,
    pub role: String,
    pub birth_date: NaiveDate,
    pub hire_date: NaiveDate,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl EmployeeVersion {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |valid_to| at < valid_to)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_identifier("employee_id", &self.employee_id)?;
        check_not_blank("name", &self.name)?;
        check_not_blank("email", &self.email)?;
        check_identifier("unit_id", &self.unit_id)?;
        if self.hire_date < self.birth_date {
            return Err(ValidationError::InvalidShape(
                "hire_date precedes birth_date".to_string(),
            ));
        }
        if self.valid_from.date_naive() < self.hire_date {
            return Err(ValidationError::InvalidShape(
                "valid_from precedes hire_date".to_string(),
            ));
        }
        check_interval(self.valid_from, self.valid_to)
    }
}
