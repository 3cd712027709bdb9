//! Organizational unit versions.
//!
//! # Invariants
//! - `unit_id` is stable across renames and never reused for a genuinely
//!   new entity (each half of a split gets a new id).
//! - Versions of one unit are contiguous and non-overlapping; at most one
//!   version is open (`valid_to = None`). Enforced by the lineage store.

use crate::model::validation::{
    check_identifier, check_interval, check_not_blank, check_unit_path, ValidationError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable organizational unit identifier.
pub type UnitId = String;

/// One time-sliced version of an organizational unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnitVersion {
    pub unit_id: UnitId,
    pub name: String,
    pub parent_unit_id: Option<UnitId>,
    /// Materialised dot-separated path, e.g. `root.apac.sales`.
    pub path: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl OrgUnitVersion {
    /// Creates an open (currently valid) version without a parent.
    pub fn new(
        unit_id: impl Into<UnitId>,
        name: impl Into<String>,
        path: impl Into<String>,
        valid_from: DateTime<Utc>,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            name: name.into(),
            parent_unit_id: None,
            path: path.into(),
            valid_from,
            valid_to: None,
        }
    }

    pub fn with_parent(mut self, parent_unit_id: impl Into<UnitId>) -> Self {
        self.parent_unit_id = Some(parent_unit_id.into());
        self
    }

    pub fn closed_at(mut self, valid_to: DateTime<Utc>) -> Self {
        self.valid_to = Some(valid_to);
        self
    }

    /// Half-open coverage test: `valid_from <= at < valid_to`.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |valid_to| at < valid_to)
    }

    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Whether this version shares at least one instant with `other`.
    pub fn overlaps(&self, other: &OrgUnitVersion) -> bool {
        let starts_before_other_ends = other.valid_to.map_or(true, |end| self.valid_from < end);
        let other_starts_before_end = self.valid_to.map_or(true, |end| other.valid_from < end);
        starts_before_other_ends && other_starts_before_end
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_identifier("unit_id", &self.unit_id)?;
        check_not_blank("name", &self.name)?;
        if let Some(parent) = &self.parent_unit_id {
            check_identifier("parent_unit_id", parent)?;
        }
        check_unit_path(&self.path)?;
        check_interval(self.valid_from, self.valid_to)
    }
}
