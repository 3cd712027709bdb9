//! Dashboard query model: filter modes, typed filters and resolved
//! predicates.
//!
//! # Responsibility
//! - Replace loosely-typed filter maps with a closed set of typed field
//!   descriptors, validated at the translation boundary.
//! - Describe the resolved predicate executed against stored snapshots.
//!
//! # Invariants
//! - Only `department` and `unit_id` are lineage-translatable.
//! - A `UnitIdIn` predicate with an empty set matches nothing.

use crate::model::org_unit::UnitId;
use crate::model::response::SurveyResponse;
use crate::model::time_range::{MalformedTimeRange, TimeRange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Caller supplied a value this layer refuses before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidArgument {
    message: String,
}

impl InvalidArgument {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for InvalidArgument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid argument: {}", self.message)
    }
}

impl Error for InvalidArgument {}

impl From<MalformedTimeRange> for InvalidArgument {
    fn from(value: MalformedTimeRange) -> Self {
        Self::new(value.to_string())
    }
}

/// How dashboard filters relate to organizational evolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterMode {
    /// Match data as recorded at response time.
    Historical,
    /// Map organizational filters through lineage to present-day naming.
    Current,
    /// Run both and merge with provenance counts.
    Hybrid,
}

impl FilterMode {
    /// Parses a mode name, case-insensitively and ignoring surrounding
    /// whitespace.
    pub fn parse(value: &str) -> Result<Self, InvalidArgument> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HISTORICAL" => Ok(Self::Historical),
            "CURRENT" => Ok(Self::Current),
            "HYBRID" => Ok(Self::Hybrid),
            _ => Err(InvalidArgument::new(format!(
                "unknown filter mode `{}`; expected HISTORICAL|CURRENT|HYBRID",
                value.trim()
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Historical => "HISTORICAL",
            Self::Current => "CURRENT",
            Self::Hybrid => "HYBRID",
        }
    }
}

impl FromStr for FilterMode {
    type Err = InvalidArgument;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Value type carried by a filter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterValueType {
    Text,
    Integer,
    Number,
}

/// Closed set of filterable snapshot fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Department,
    UnitId,
    UnitPath,
    EmployeeName,
    EmployeeEmail,
    PerformanceGrade,
    Role,
    Age,
    Tenure,
}

impl FilterField {
    pub const ALL: [FilterField; 9] = [
        Self::Department,
        Self::UnitId,
        Self::UnitPath,
        Self::EmployeeName,
        Self::EmployeeEmail,
        Self::PerformanceGrade,
        Self::Role,
        Self::Age,
        Self::Tenure,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.snapshot_key() == name)
    }

    /// Key of the field inside the stored snapshot payload.
    pub fn snapshot_key(self) -> &'static str {
        match self {
            Self::Department => "department",
            Self::UnitId => "unit_id",
            Self::UnitPath => "unit_path",
            Self::EmployeeName => "employee_name",
            Self::EmployeeEmail => "employee_email",
            Self::PerformanceGrade => "performance_grade",
            Self::Role => "role",
            Self::Age => "age",
            Self::Tenure => "tenure",
        }
    }

    pub fn value_type(self) -> FilterValueType {
        match self {
            Self::Age => FilterValueType::Integer,
            Self::Tenure => FilterValueType::Number,
            _ => FilterValueType::Text,
        }
    }

    /// Whether `CURRENT` mode maps this field through unit lineage.
    pub fn is_lineage_translatable(self) -> bool {
        matches!(self, Self::Department | Self::UnitId)
    }
}

/// One typed filter operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterScalar {
    Text(String),
    Integer(i64),
    Number(f64),
}

impl FilterScalar {
    fn from_json(field: FilterField, value: &Value) -> Result<Self, InvalidArgument> {
        let scalar = match field.value_type() {
            FilterValueType::Text => value.as_str().map(|text| Self::Text(text.to_string())),
            FilterValueType::Integer => value.as_i64().map(Self::Integer),
            FilterValueType::Number => value.as_f64().map(Self::Number),
        };
        scalar.ok_or_else(|| {
            InvalidArgument::new(format!(
                "filter `{}` expects a {:?} value, got `{value}`",
                field.snapshot_key(),
                field.value_type()
            ))
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// Field constraint: equality with one value, membership with several.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: FilterField,
    pub values: Vec<FilterScalar>,
}

impl Filter {
    pub fn text(field: FilterField, value: impl Into<String>) -> Self {
        Self {
            field,
            values: vec![FilterScalar::Text(value.into())],
        }
    }

    pub fn integer(field: FilterField, value: i64) -> Self {
        Self {
            field,
            values: vec![FilterScalar::Integer(value)],
        }
    }

    pub fn one_of(field: FilterField, values: Vec<FilterScalar>) -> Self {
        Self { field, values }
    }
}

/// Validated filters, at most one per field, iterated in field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    filters: BTreeMap<FilterField, Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the filter for its field.
    pub fn with(mut self, filter: Filter) -> Self {
        self.filters.insert(filter.field, filter);
        self
    }

    /// Validates a raw `{field: value | [values]}` map.
    ///
    /// Unknown fields, wrongly typed values and empty value lists are all
    /// rejected.
    pub fn from_json_map(map: &serde_json::Map<String, Value>) -> Result<Self, InvalidArgument> {
        let mut filters = BTreeMap::new();
        for (name, raw) in map {
            let field = FilterField::parse(name)
                .ok_or_else(|| InvalidArgument::new(format!("unknown filter field `{name}`")))?;
            let values = match raw {
                Value::Array(items) if items.is_empty() => {
                    return Err(InvalidArgument::new(format!(
                        "filter `{name}` has an empty value list"
                    )));
                }
                Value::Array(items) => items
                    .iter()
                    .map(|item| FilterScalar::from_json(field, item))
                    .collect::<Result<Vec<_>, _>>()?,
                scalar => vec![FilterScalar::from_json(field, scalar)?],
            };
            filters.insert(field, Filter { field, values });
        }
        Ok(Self { filters })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.values()
    }

    pub fn get(&self, field: FilterField) -> Option<&Filter> {
        self.filters.get(&field)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// One executable constraint over stored snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `snapshot_core[field]` equals one of `values`.
    Matches {
        field: FilterField,
        values: Vec<FilterScalar>,
    },
    /// `snapshot_core.unit_id` is in the lineage-resolved set.
    UnitIdIn(BTreeSet<UnitId>),
}

/// Conjunction of predicates plus the submission time window.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPredicate {
    pub predicates: Vec<Predicate>,
    pub time_range: TimeRange,
}

impl ResolvedPredicate {
    /// True when some predicate can never match, so execution can skip I/O.
    pub fn is_unsatisfiable(&self) -> bool {
        self.predicates.iter().any(|predicate| match predicate {
            Predicate::UnitIdIn(units) => units.is_empty(),
            Predicate::Matches { values, .. } => values.is_empty(),
        })
    }

    /// Union of every lineage-resolved unit set in this predicate.
    pub fn lineage_units(&self) -> BTreeSet<UnitId> {
        self.predicates
            .iter()
            .filter_map(|predicate| match predicate {
                Predicate::UnitIdIn(units) => Some(units.iter().cloned()),
                Predicate::Matches { .. } => None,
            })
            .flatten()
            .collect()
    }
}

/// Output of filter translation, shaped by mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedQuery {
    Historical(ResolvedPredicate),
    Current(ResolvedPredicate),
    Hybrid {
        historical: ResolvedPredicate,
        current: ResolvedPredicate,
    },
}

/// Validated dashboard query.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardQuery {
    pub filters: FilterSet,
    pub mode: FilterMode,
    pub time_range: TimeRange,
    pub tenant_id: String,
}

impl DashboardQuery {
    pub fn new(
        filters: FilterSet,
        mode: FilterMode,
        time_range: TimeRange,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            filters,
            mode,
            time_range,
            tenant_id: tenant_id.into(),
        }
    }

    /// Builds a query from caller-shaped input, rejecting anything
    /// malformed before storage is touched.
    pub fn from_raw(
        filters: &serde_json::Map<String, Value>,
        filter_mode: &str,
        time_range: TimeRange,
        tenant_id: &str,
    ) -> Result<Self, InvalidArgument> {
        if tenant_id.trim().is_empty() {
            return Err(InvalidArgument::new("tenant_id must not be blank"));
        }
        Ok(Self {
            filters: FilterSet::from_json_map(filters)?,
            mode: FilterMode::parse(filter_mode)?,
            time_range,
            tenant_id: tenant_id.to_string(),
        })
    }
}

/// Per-path counts attached to hybrid results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub historical_count: usize,
    pub current_count: usize,
    /// Sorted unit ids the current path was expanded to.
    pub historical_units: Vec<UnitId>,
}

/// Dashboard query output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardResult {
    pub responses: Vec<SurveyResponse>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}
