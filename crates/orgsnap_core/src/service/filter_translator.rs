//! Dashboard filter translation.
//!
//! `HISTORICAL` matches snapshots exactly as recorded. `CURRENT` replaces
//! organizational filters with the set of every unit id that is, or
//! evolved into, the named present-day unit, so responses recorded under a
//! predecessor still match. `HYBRID` produces both.

use crate::lineage::resolver::{LineageResolver, ResolveResult};
use crate::model::lineage::Direction;
use crate::model::org_unit::UnitId;
use crate::model::query::{
    Filter, FilterField, FilterMode, FilterSet, Predicate, ResolvedPredicate, ResolvedQuery,
};
use crate::model::time_range::TimeRange;
use crate::repo::lineage_repo::{LineageGraph, OrgState};
use std::collections::BTreeSet;

pub struct FilterTranslator<'a, S: ?Sized> {
    resolver: LineageResolver<'a, S>,
}

impl<'a, S> FilterTranslator<'a, S>
where
    S: LineageGraph + OrgState + ?Sized,
{
    pub fn new(resolver: LineageResolver<'a, S>) -> Self {
        Self { resolver }
    }

    pub fn translate(
        &self,
        filters: &FilterSet,
        mode: FilterMode,
        time_range: &TimeRange,
    ) -> ResolveResult<ResolvedQuery> {
        Ok(match mode {
            FilterMode::Historical => ResolvedQuery::Historical(as_recorded(filters, time_range)),
            FilterMode::Current => ResolvedQuery::Current(self.through_lineage(filters, time_range)?),
            FilterMode::Hybrid => ResolvedQuery::Hybrid {
                historical: as_recorded(filters, time_range),
                current: self.through_lineage(filters, time_range)?,
            },
        })
    }

    fn through_lineage(
        &self,
        filters: &FilterSet,
        time_range: &TimeRange,
    ) -> ResolveResult<ResolvedPredicate> {
        let mut predicates = Vec::with_capacity(filters.len());
        for filter in filters.iter() {
            let predicate = match filter.field {
                FilterField::Department => Predicate::UnitIdIn(self.units_named(filter, time_range)?),
                FilterField::UnitId => Predicate::UnitIdIn(self.units_from_ids(filter, time_range)?),
                _ => matches(filter),
            };
            predicates.push(predicate);
        }
        Ok(ResolvedPredicate {
            predicates,
            time_range: *time_range,
        })
    }

    /// Union of the histories of every present-day unit named in `filter`.
    fn units_named(&self, filter: &Filter, time_range: &TimeRange) -> ResolveResult<BTreeSet<UnitId>> {
        let mut units = BTreeSet::new();
        for name in filter.values.iter().filter_map(|value| value.as_text()) {
            units.extend(
                self.resolver
                    .resolve_by_name(name, Direction::ToHistorical, time_range)?,
            );
        }
        Ok(units)
    }

    fn units_from_ids(
        &self,
        filter: &Filter,
        time_range: &TimeRange,
    ) -> ResolveResult<BTreeSet<UnitId>> {
        let mut units = BTreeSet::new();
        for unit_id in filter.values.iter().filter_map(|value| value.as_text()) {
            units.extend(
                self.resolver
                    .resolve(unit_id, Direction::ToHistorical, time_range)?,
            );
        }
        Ok(units)
    }
}

fn as_recorded(filters: &FilterSet, time_range: &TimeRange) -> ResolvedPredicate {
    ResolvedPredicate {
        predicates: filters.iter().map(matches).collect(),
        time_range: *time_range,
    }
}

fn matches(filter: &Filter) -> Predicate {
    Predicate::Matches {
        field: filter.field,
        values: filter.values.clone(),
    }
}
