//! Shape validation shared by units, edges and employee versions.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]{0,127}$").expect("valid id regex"));
static UNIT_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*$").expect("valid unit path regex")
});

/// Validation failure for a domain record, raised before any storage write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required text field is blank after trim.
    BlankField(&'static str),
    /// Identifier contains characters outside the accepted alphabet.
    InvalidIdentifier { field: &'static str, value: String },
    /// Materialised unit path is not dot-separated segments.
    InvalidUnitPath(String),
    /// `valid_to` is not strictly after `valid_from`.
    EmptyInterval {
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    },
    /// Relationship shape (source/target cardinality) is not allowed.
    InvalidShape(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankField(field) => write!(f, "`{field}` must not be blank"),
            Self::InvalidIdentifier { field, value } => {
                write!(f, "`{field}` is not a valid identifier: `{value}`")
            }
            Self::InvalidUnitPath(value) => write!(f, "invalid unit path `{value}`"),
            Self::EmptyInterval {
                valid_from,
                valid_to,
            } => write!(
                f,
                "validity interval is empty: valid_to {valid_to} is not after valid_from {valid_from}"
            ),
            Self::InvalidShape(message) => write!(f, "invalid relationship shape: {message}"),
        }
    }
}

impl Error for ValidationError {}

pub(crate) fn check_identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::BlankField(field));
    }
    if !IDENTIFIER_RE.is_match(value) {
        return Err(ValidationError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn check_not_blank(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::BlankField(field));
    }
    Ok(())
}

pub(crate) fn check_unit_path(value: &str) -> Result<(), ValidationError> {
    if !UNIT_PATH_RE.is_match(value) {
        return Err(ValidationError::InvalidUnitPath(value.to_string()));
    }
    Ok(())
}

pub(crate) fn check_interval(
    valid_from: DateTime<Utc>,
    valid_to: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    match valid_to {
        Some(valid_to) if valid_to <= valid_from => Err(ValidationError::EmptyInterval {
            valid_from,
            valid_to,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_accept_typical_unit_ids() {
        assert!(check_identifier("unit_id", "unit_123").is_ok());
        assert!(check_identifier("unit_id", "emp-7.a:b").is_ok());
    }

    #[test]
    fn identifiers_reject_spaces_and_blank() {
        assert_eq!(
            check_identifier("unit_id", "  "),
            Err(ValidationError::BlankField("unit_id"))
        );
        assert!(matches!(
            check_identifier("unit_id", "unit 123"),
            Err(ValidationError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn unit_path_requires_dot_separated_segments() {
        assert!(check_unit_path("root.apac.sales").is_ok());
        assert!(check_unit_path("root..sales").is_err());
        assert!(check_unit_path("").is_err());
    }
}
