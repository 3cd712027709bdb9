//! Transitive lineage resolution.
//!
//! # Responsibility
//! - Expand one unit into every identifier it descends from
//!   (`ToHistorical`) or evolved into (`ToCurrent`).
//! - Map a unit name to the identifier that anchors a resolution.
//!
//! # Invariants
//! - The anchor always belongs to its own closure.
//! - Traversal is time-respecting: after arriving at a unit through an
//!   edge effective at `t`, `ToCurrent` only follows edges effective at or
//!   after `t` and `ToHistorical` only edges effective at or before `t`.
//!   A unit id reused in different eras therefore never loops.
//! - Each edge is followed at most once, so traversal terminates on any
//!   graph, including corrupt ones.
//! - A cycle is a loop of non-self edges sharing one effective instant;
//!   finding one is an error, never a silent cut.
//! - Only edges effective at or before the window end are followed.

use crate::lineage::cache::{CacheKey, LineageCache};
use crate::logging::sanitize_for_log;
use crate::model::lineage::Direction;
use crate::model::org_unit::UnitId;
use crate::model::time_range::TimeRange;
use crate::repo::lineage_repo::{LineageGraph, LineageStoreError, LineageStoreResult, OrgState};
use crate::repo::state::{StateError, UnitLookup};
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ResolveResult<T> = Result<T, ResolveError>;

const MAX_LOGGED_NAME_CHARS: usize = 64;

#[derive(Debug)]
pub enum ResolveError {
    Store(LineageStoreError),
    State(StateError),
    /// Several units carry the name within the window.
    Ambiguous { name: String, candidates: Vec<UnitId> },
    /// The lineage graph loops through `unit_id` at instant `at`.
    CycleDetected { unit_id: UnitId, at: DateTime<Utc> },
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::State(err) => write!(f, "{err}"),
            Self::Ambiguous { name, candidates } => write!(
                f,
                "unit name `{name}` is ambiguous: {}",
                candidates.join(", ")
            ),
            Self::CycleDetected { unit_id, at } => {
                write!(f, "lineage cycle through `{unit_id}` at {at}")
            }
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::State(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LineageStoreError> for ResolveError {
    fn from(value: LineageStoreError) -> Self {
        Self::Store(value)
    }
}

impl From<StateError> for ResolveError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

/// Outcome of one traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Closure {
    pub units: BTreeSet<UnitId>,
    /// Most recent effective date among followed edges.
    pub latest_effective: Option<DateTime<Utc>>,
    pub cycle: Option<(UnitId, DateTime<Utc>)>,
}

/// Breadth-first, time-respecting traversal from `anchor`.
pub(crate) fn closure<G: LineageGraph + ?Sized>(
    graph: &G,
    anchor: &str,
    direction: Direction,
    window_end: DateTime<Utc>,
) -> LineageStoreResult<Closure> {
    let mut units = BTreeSet::from([anchor.to_string()]);
    let mut seen_nodes: HashSet<(UnitId, Option<DateTime<Utc>>)> =
        HashSet::from([(anchor.to_string(), None)]);
    let mut queue = VecDeque::from([(anchor.to_string(), None::<DateTime<Utc>>)]);
    let mut followed: HashSet<Uuid> = HashSet::new();
    let mut hops_by_instant: BTreeMap<DateTime<Utc>, Vec<(UnitId, UnitId)>> = BTreeMap::new();
    let mut latest_effective = None;

    while let Some((unit, arrived_at)) = queue.pop_front() {
        let edges = match direction {
            Direction::ToCurrent => graph.find_edges_by_source(&unit)?,
            Direction::ToHistorical => graph.find_edges_by_target(&unit)?,
        };

        for edge in edges {
            let effective = edge.effective_date;
            if effective > window_end {
                continue;
            }
            let in_order = match (direction, arrived_at) {
                (_, None) => true,
                (Direction::ToCurrent, Some(at)) => effective >= at,
                (Direction::ToHistorical, Some(at)) => effective <= at,
            };
            if !in_order || !followed.insert(edge.mapping_id) {
                continue;
            }
            latest_effective = latest_effective.max(Some(effective));

            for target in &edge.target_unit_ids {
                if *target != edge.source_unit_id {
                    hops_by_instant
                        .entry(effective)
                        .or_default()
                        .push((edge.source_unit_id.clone(), target.clone()));
                }
            }

            let next_units = match direction {
                Direction::ToCurrent => edge.target_unit_ids,
                Direction::ToHistorical => vec![edge.source_unit_id],
            };
            for next in next_units {
                units.insert(next.clone());
                if seen_nodes.insert((next.clone(), Some(effective))) {
                    queue.push_back((next, Some(effective)));
                }
            }
        }
    }

    let cycle = hops_by_instant
        .iter()
        .find_map(|(at, hops)| find_loop(hops).map(|unit_id| (unit_id, *at)));

    Ok(Closure {
        units,
        latest_effective,
        cycle,
    })
}

/// First unit found on a directed loop among `hops`, if any.
fn find_loop(hops: &[(UnitId, UnitId)]) -> Option<UnitId> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (from, to) in hops {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Open,
        Done,
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    for &start in adjacency.keys() {
        if marks.contains_key(start) {
            continue;
        }
        // Iterative DFS: (node, index of next child to visit).
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        marks.insert(start, Mark::Open);
        while let Some((node, child_index)) = stack.pop() {
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&child) = children.get(child_index) {
                stack.push((node, child_index + 1));
                match marks.get(child).copied() {
                    Some(Mark::Open) => return Some(child.to_string()),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::Open);
                        stack.push((child, 0));
                    }
                }
            } else {
                marks.insert(node, Mark::Done);
            }
        }
    }
    None
}

/// Loop reachable forward from `unit_id` through edges of any date.
pub(crate) fn find_cycle_from<G: LineageGraph + ?Sized>(
    graph: &G,
    unit_id: &str,
) -> LineageStoreResult<Option<(UnitId, DateTime<Utc>)>> {
    Ok(closure(graph, unit_id, Direction::ToCurrent, DateTime::<Utc>::MAX_UTC)?.cycle)
}

/// Resolves lineage closures over a store, optionally through a cache.
pub struct LineageResolver<'a, S: ?Sized> {
    store: &'a S,
    /// Cache plus the generation observed before `store` took its snapshot.
    cache: Option<(&'a LineageCache, u64)>,
    now: DateTime<Utc>,
}

impl<'a, S> LineageResolver<'a, S>
where
    S: LineageGraph + OrgState + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            cache: None,
            now: Utc::now(),
        }
    }

    /// Memoises through `cache`, treating its current generation as the
    /// one `store` was read under. Only correct when `store` is not pinned
    /// to an older snapshot; otherwise use [`Self::with_cache_at`].
    pub fn with_cache(self, cache: &'a LineageCache) -> Self {
        let generation = cache.generation();
        self.with_cache_at(cache, generation)
    }

    /// Memoises through `cache`, where `generation` was read from it before
    /// the transaction behind `store` observed any row. A closure computed
    /// from a snapshot older than a later eviction is then never inserted.
    pub fn with_cache_at(mut self, cache: &'a LineageCache, generation: u64) -> Self {
        self.cache = Some((cache, generation));
        self
    }

    /// Overrides the instant treated as "now" (current names, cacheability).
    pub fn as_of(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Every unit id connected to `anchor` in `direction`, following edges
    /// effective up to `window.to()`. Includes the anchor.
    pub fn resolve(
        &self,
        anchor: &str,
        direction: Direction,
        window: &TimeRange,
    ) -> ResolveResult<BTreeSet<UnitId>> {
        let key = CacheKey {
            anchor: anchor.to_string(),
            direction,
            window_end: window.to(),
        };
        if let Some((cache, _)) = self.cache {
            if let Some(hit) = cache.get(&key) {
                debug!(
                    "event=lineage_resolve module=lineage status=ok cache=hit direction={} units={}",
                    direction.as_str(),
                    hit.len()
                );
                return Ok(hit.as_ref().clone());
            }
        }
        let resolved = closure(self.store, anchor, direction, window.to())?;
        if let Some((unit_id, at)) = resolved.cycle {
            error!(
                "event=lineage_resolve module=lineage status=error error_code=cycle_detected unit_id={unit_id}"
            );
            return Err(ResolveError::CycleDetected { unit_id, at });
        }

        // Closures touching future-dated edges change meaning as time
        // passes, so only settled history is memoised.
        let settled = resolved
            .latest_effective
            .map_or(true, |latest| latest <= self.now);
        if let (Some((cache, generation)), true) = (self.cache, settled) {
            cache.insert_if_unchanged(key, resolved.units.clone(), generation);
        }

        debug!(
            "event=lineage_resolve module=lineage status=ok cache=miss direction={} units={}",
            direction.as_str(),
            resolved.units.len()
        );
        Ok(resolved.units)
    }

    /// Maps a unit name to the id anchoring a resolution in `direction`.
    ///
    /// `ToHistorical` starts from today's organization, so the name must
    /// be current. `ToCurrent` starts from history, so the name must have
    /// been in use at some point inside `window`. `None` when no unit
    /// matches.
    pub fn resolve_name(
        &self,
        name: &str,
        direction: Direction,
        window: &TimeRange,
    ) -> ResolveResult<Option<UnitId>> {
        let scope = match direction {
            Direction::ToHistorical => TimeRange::at(self.now),
            Direction::ToCurrent => *window,
        };
        match self.store.find_unit_by_name(name, &scope)? {
            UnitLookup::Found(unit_id) => Ok(Some(unit_id)),
            UnitLookup::NotFound => Ok(None),
            UnitLookup::Ambiguous(candidates) => {
                warn!(
                    "event=lineage_resolve_name module=lineage status=rejected error_code=ambiguous name={} candidates={}",
                    sanitize_for_log(name.trim(), MAX_LOGGED_NAME_CHARS),
                    candidates.len()
                );
                Err(ResolveError::Ambiguous {
                    name: name.trim().to_string(),
                    candidates,
                })
            }
        }
    }

    /// [`Self::resolve_name`] then [`Self::resolve`]; an unknown name
    /// resolves to the empty set.
    pub fn resolve_by_name(
        &self,
        name: &str,
        direction: Direction,
        window: &TimeRange,
    ) -> ResolveResult<BTreeSet<UnitId>> {
        match self.resolve_name(name, direction, window)? {
            Some(anchor) => self.resolve(&anchor, direction, window),
            None => Ok(BTreeSet::new()),
        }
    }
}
