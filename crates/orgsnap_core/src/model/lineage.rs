//! Lineage edges and organizational restructures.
//!
//! # Invariants
//! - An edge is immutable once recorded; the edge set is append-only.
//! - RENAME: one source, one target (the target may be the source itself
//!   when identity persists).
//! - SPLIT: one source, two or more distinct targets, none equal to the
//!   source.
//! - MERGE: one target per edge; several edges share it, one per
//!   contributing source. The target may be one of the sources when that
//!   unit absorbs the others.

use crate::model::org_unit::{OrgUnitVersion, UnitId};
use crate::model::validation::{check_identifier, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Relationship recorded by one lineage edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingType {
    /// 1:1, same organizational entity under a new name.
    Rename,
    /// N:1, several units fold into one.
    Merge,
    /// 1:N, one unit becomes several new ones.
    Split,
}

impl MappingType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rename => "RENAME",
            Self::Merge => "MERGE",
            Self::Split => "SPLIT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RENAME" => Some(Self::Rename),
            "MERGE" => Some(Self::Merge),
            "SPLIT" => Some(Self::Split),
            _ => None,
        }
    }
}

/// Traversal direction for lineage resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// From a current unit back to every ancestor identifier.
    ToHistorical,
    /// From a historical unit forward to every identifier it evolved into.
    ToCurrent,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToHistorical => "to_historical",
            Self::ToCurrent => "to_current",
        }
    }
}

/// One recorded supersession: at `effective_date`, `source_unit_id` stops
/// being current and is superseded by `target_unit_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub mapping_id: Uuid,
    pub source_unit_id: UnitId,
    /// Kept in recorded order.
    pub target_unit_ids: Vec<UnitId>,
    pub relationship: MappingType,
    pub effective_date: DateTime<Utc>,
    pub description: String,
}

impl LineageEdge {
    /// Creates an edge with a generated mapping id.
    pub fn new(
        source_unit_id: impl Into<UnitId>,
        target_unit_ids: Vec<UnitId>,
        relationship: MappingType,
        effective_date: DateTime<Utc>,
    ) -> Self {
        Self {
            mapping_id: Uuid::new_v4(),
            source_unit_id: source_unit_id.into(),
            target_unit_ids,
            relationship,
            effective_date,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether the edge maps a unit onto itself (identity-preserving rename).
    pub fn is_self_edge(&self) -> bool {
        self.target_unit_ids.len() == 1 && self.target_unit_ids[0] == self.source_unit_id
    }

    pub fn has_target(&self, unit_id: &str) -> bool {
        self.target_unit_ids.iter().any(|target| target == unit_id)
    }

    /// Every unit id the edge references.
    pub fn touched_units(&self) -> BTreeSet<UnitId> {
        let mut units: BTreeSet<UnitId> = self.target_unit_ids.iter().cloned().collect();
        units.insert(self.source_unit_id.clone());
        units
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_identifier("source_unit_id", &self.source_unit_id)?;
        for target in &self.target_unit_ids {
            check_identifier("target_unit_ids", target)?;
        }

        let distinct: BTreeSet<&str> = self.target_unit_ids.iter().map(String::as_str).collect();
        if distinct.len() != self.target_unit_ids.len() {
            return Err(ValidationError::InvalidShape(
                "target_unit_ids contains duplicates".to_string(),
            ));
        }

        let count = self.target_unit_ids.len();
        match self.relationship {
            MappingType::Rename if count != 1 => Err(ValidationError::InvalidShape(format!(
                "RENAME requires exactly one target, got {count}"
            ))),
            MappingType::Merge if count != 1 => Err(ValidationError::InvalidShape(format!(
                "MERGE edge requires exactly one target, got {count}"
            ))),
            MappingType::Split if count < 2 => Err(ValidationError::InvalidShape(format!(
                "SPLIT requires at least two targets, got {count}"
            ))),
            MappingType::Split if self.has_target(&self.source_unit_id) => {
                Err(ValidationError::InvalidShape(
                    "SPLIT targets must be new units, not the source".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// A complete organizational change applied as one atomic unit: every
/// source is closed at `effective_date`, every target version is opened at
/// `effective_date`, and one edge per source is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRestructure {
    pub relationship: MappingType,
    pub source_unit_ids: Vec<UnitId>,
    pub target_units: Vec<OrgUnitVersion>,
    pub effective_date: DateTime<Utc>,
    pub description: String,
}

impl OrgRestructure {
    /// Renames `unit_id` in place; identity persists.
    pub fn rename(
        unit_id: impl Into<UnitId>,
        new_name: impl Into<String>,
        new_path: impl Into<String>,
        effective_date: DateTime<Utc>,
    ) -> Self {
        let unit_id = unit_id.into();
        Self {
            relationship: MappingType::Rename,
            source_unit_ids: vec![unit_id.clone()],
            target_units: vec![OrgUnitVersion::new(
                unit_id,
                new_name,
                new_path,
                effective_date,
            )],
            effective_date,
            description: String::new(),
        }
    }

    pub fn split(
        source_unit_id: impl Into<UnitId>,
        target_units: Vec<OrgUnitVersion>,
        effective_date: DateTime<Utc>,
    ) -> Self {
        Self {
            relationship: MappingType::Split,
            source_unit_ids: vec![source_unit_id.into()],
            target_units,
            effective_date,
            description: String::new(),
        }
    }

    pub fn merge(
        source_unit_ids: Vec<UnitId>,
        target_unit: OrgUnitVersion,
        effective_date: DateTime<Utc>,
    ) -> Self {
        Self {
            relationship: MappingType::Merge,
            source_unit_ids,
            target_units: vec![target_unit],
            effective_date,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Checks cardinality and that every target version opens exactly at
    /// the effective date.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let sources = self.source_unit_ids.len();
        let targets = self.target_units.len();
        let shape_ok = match self.relationship {
            MappingType::Rename => sources == 1 && targets == 1,
            MappingType::Split => sources == 1 && targets >= 2,
            MappingType::Merge => sources >= 2 && targets == 1,
        };
        if !shape_ok {
            return Err(ValidationError::InvalidShape(format!(
                "{} restructure cannot have {sources} source(s) and {targets} target(s)",
                self.relationship.as_str()
            )));
        }

        let distinct_sources: BTreeSet<&str> =
            self.source_unit_ids.iter().map(String::as_str).collect();
        if distinct_sources.len() != sources {
            return Err(ValidationError::InvalidShape(
                "source_unit_ids contains duplicates".to_string(),
            ));
        }

        for unit in &self.target_units {
            unit.validate()?;
            if unit.valid_from != self.effective_date || unit.valid_to.is_some() {
                return Err(ValidationError::InvalidShape(format!(
                    "target unit `{}` must open exactly at the effective date",
                    unit.unit_id
                )));
            }
        }

        for edge in self.edges() {
            edge.validate()?;
        }
        Ok(())
    }

    /// One edge per source, each naming every target.
    pub fn edges(&self) -> Vec<LineageEdge> {
        let targets: Vec<UnitId> = self
            .target_units
            .iter()
            .map(|unit| unit.unit_id.clone())
            .collect();
        self.source_unit_ids
            .iter()
            .map(|source| {
                LineageEdge::new(
                    source.clone(),
                    targets.clone(),
                    self.relationship,
                    self.effective_date,
                )
                .with_description(self.description.clone())
            })
            .collect()
    }
}
