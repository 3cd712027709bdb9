//! Closed time range used by dashboard queries and lineage windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Range end precedes range start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedTimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Display for MalformedTimeRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed time range: `to` {} precedes `from` {}",
            self.to, self.from
        )
    }
}

impl Error for MalformedTimeRange {}

/// Inclusive `[from, to]` range.
///
/// Fields are private so every value in circulation is well-formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange", into = "RawTimeRange")]
pub struct TimeRange {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct RawTimeRange {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = MalformedTimeRange;

    fn try_from(value: RawTimeRange) -> Result<Self, Self::Error> {
        Self::new(value.from, value.to)
    }
}

impl From<TimeRange> for RawTimeRange {
    fn from(value: TimeRange) -> Self {
        Self {
            from: value.from,
            to: value.to,
        }
    }
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, MalformedTimeRange> {
        if to < from {
            return Err(MalformedTimeRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Degenerate range covering exactly one instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            from: instant,
            to: instant,
        }
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant <= self.to
    }
}

#[cfg(test)]
mod tests {
    use super::TimeRange;
    use chrono::{TimeZone, Utc};

    #[test]
    fn rejects_inverted_bounds() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        assert!(TimeRange::new(early, late).is_ok());
        assert!(TimeRange::new(late, early).is_err());
    }

    #[test]
    fn deserializing_inverted_range_fails() {
        let json = r#"{"from": "2024-12-31T00:00:00Z", "to": "2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<TimeRange>(json).is_err());
    }

    #[test]
    fn contains_is_inclusive_on_both_ends() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(from, to).unwrap();
        assert!(range.contains(from));
        assert!(range.contains(to));
    }
}
