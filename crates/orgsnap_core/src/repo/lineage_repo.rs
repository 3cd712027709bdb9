//! Organizational unit versions and lineage edges: contracts and SQLite
//! implementation.
//!
//! # Responsibility
//! - Persist unit versions and supersession edges, append-only.
//! - Answer edge lookups by source and by target for lineage traversal.
//! - Answer point-in-time unit lookups (by id, by name).
//!
//! # Invariants
//! - Every write is validated before it becomes visible: dangling source
//!   or target references, overlapping or gapped validity and
//!   same-instant cycles are rejected and leave storage untouched.
//! - Edge targets must have a version starting at or after the effective
//!   date; edge sources must have one starting before it.
//! - Edge lookups are ordered `effective_date DESC, mapping_id ASC`.
//! - A unit version is only ever closed by a restructure, never edited.

use crate::db::codec::{instant_from_db, instant_to_db};
use crate::db::migrations::ensure_current;
use crate::db::DbError;
use crate::lineage::resolver::find_cycle_from;
use crate::model::lineage::{LineageEdge, MappingType, OrgRestructure};
use crate::model::org_unit::{OrgUnitVersion, UnitId};
use crate::model::time_range::TimeRange;
use crate::model::validation::ValidationError;
use crate::repo::state::{StateError, StateResult, UnitLookup};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

pub type LineageStoreResult<T> = Result<T, LineageStoreError>;

/// A write that would corrupt the lineage graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    Invalid(ValidationError),
    /// Edge source has no version before the effective date.
    UnknownSource {
        unit_id: UnitId,
        effective_date: DateTime<Utc>,
    },
    /// Edge target has no version starting at or after the effective date.
    DanglingTarget {
        unit_id: UnitId,
        effective_date: DateTime<Utc>,
    },
    /// New version overlaps an existing version of the same unit.
    OverlappingValidity {
        unit_id: UnitId,
        valid_from: DateTime<Utc>,
    },
    /// New version leaves a gap after the unit's last closed version.
    NonContiguousValidity {
        unit_id: UnitId,
        expected_from: DateTime<Utc>,
        actual_from: DateTime<Utc>,
    },
    /// Restructure source has no open version that started before the
    /// effective date.
    SourceNotCurrent {
        unit_id: UnitId,
        effective_date: DateTime<Utc>,
    },
    /// Restructure target already has an open version and is not a source.
    TargetAlreadyOpen(UnitId),
    /// The edge closes a supersession loop within one instant.
    CycleDetected { unit_id: UnitId, at: DateTime<Utc> },
    DuplicateMapping(Uuid),
}

impl Display for IntegrityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(err) => write!(f, "{err}"),
            Self::UnknownSource {
                unit_id,
                effective_date,
            } => write!(
                f,
                "lineage source `{unit_id}` has no version before {effective_date}"
            ),
            Self::DanglingTarget {
                unit_id,
                effective_date,
            } => write!(
                f,
                "lineage target `{unit_id}` has no version starting at or after {effective_date}"
            ),
            Self::OverlappingValidity {
                unit_id,
                valid_from,
            } => write!(
                f,
                "version of `{unit_id}` starting {valid_from} overlaps an existing version"
            ),
            Self::NonContiguousValidity {
                unit_id,
                expected_from,
                actual_from,
            } => write!(
                f,
                "version of `{unit_id}` must start at {expected_from}, got {actual_from}"
            ),
            Self::SourceNotCurrent {
                unit_id,
                effective_date,
            } => write!(
                f,
                "unit `{unit_id}` is not current before {effective_date}"
            ),
            Self::TargetAlreadyOpen(unit_id) => {
                write!(f, "target unit `{unit_id}` already has an open version")
            }
            Self::CycleDetected { unit_id, at } => {
                write!(f, "lineage cycle through `{unit_id}` at {at}")
            }
            Self::DuplicateMapping(id) => write!(f, "mapping already recorded: {id}"),
        }
    }
}

impl Error for IntegrityError {}

#[derive(Debug)]
pub enum LineageStoreError {
    Db(DbError),
    Integrity(IntegrityError),
    /// Persisted rows cannot be converted to the domain model.
    InvalidData(String),
}

impl LineageStoreError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Integrity(IntegrityError::CycleDetected { .. }) => "cycle_detected",
            Self::Integrity(_) => "integrity_error",
            Self::Db(_) | Self::InvalidData(_) => "storage_error",
        }
    }
}

impl Display for LineageStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Integrity(err) => write!(f, "integrity violation: {err}"),
            Self::InvalidData(message) => write!(f, "invalid lineage data: {message}"),
        }
    }
}

impl Error for LineageStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Integrity(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for LineageStoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for LineageStoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<IntegrityError> for LineageStoreError {
    fn from(value: IntegrityError) -> Self {
        Self::Integrity(value)
    }
}

/// Read side of the lineage graph, all a traversal needs.
pub trait LineageGraph {
    /// Edges whose source is `unit_id`, most recent first.
    fn find_edges_by_source(&self, unit_id: &str) -> LineageStoreResult<Vec<LineageEdge>>;
    /// Edges naming `unit_id` as a target, most recent first.
    fn find_edges_by_target(&self, unit_id: &str) -> LineageStoreResult<Vec<LineageEdge>>;
}

/// Append-only store of unit versions and lineage edges.
pub trait LineageStore: LineageGraph {
    /// Records one unit version. The unit must have no open version, and a
    /// new version must start exactly where the previous one closed.
    fn record_unit_version(&self, unit: &OrgUnitVersion) -> LineageStoreResult<()>;
    /// Records one edge between already recorded unit versions.
    fn record_mapping(&self, edge: &LineageEdge) -> LineageStoreResult<()>;
    /// Closes sources, opens targets and records edges as one atomic change.
    /// Returns the recorded edges.
    fn record_restructure(&self, change: &OrgRestructure)
        -> LineageStoreResult<Vec<LineageEdge>>;
    /// Every version of `unit_id`, oldest first.
    fn unit_versions(&self, unit_id: &str) -> LineageStoreResult<Vec<OrgUnitVersion>>;
}

/// Point-in-time organizational lookups.
pub trait OrgState {
    /// Unit version covering `at`.
    fn get_unit_at(&self, unit_id: &str, at: DateTime<Utc>) -> StateResult<OrgUnitVersion>;
    /// Unit ids named `name` by a version overlapping `within`.
    fn find_unit_by_name(&self, name: &str, within: &TimeRange) -> StateResult<UnitLookup>;
}

/// SQLite-backed lineage store and organizational state.
pub struct SqliteLineageStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLineageStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> LineageStoreResult<Self> {
        ensure_current(conn)?;
        Ok(Self { conn })
    }

    /// Wraps a connection already checked by the caller, e.g. an open
    /// transaction.
    pub(crate) fn on(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

const EDGE_COLUMNS: &str = "m.mapping_id AS mapping_id,
    m.source_unit_id AS source_unit_id,
    m.relationship_type AS relationship_type,
    m.effective_date AS effective_date,
    m.description AS description";

const UNIT_COLUMNS: &str = "unit_id, unit_name, parent_unit_id, unit_path, valid_from, valid_to";

impl LineageGraph for SqliteLineageStore<'_> {
    fn find_edges_by_source(&self, unit_id: &str) -> LineageStoreResult<Vec<LineageEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS}
             FROM org_unit_mappings m
             WHERE m.source_unit_id = ?1
             ORDER BY m.effective_date DESC, m.mapping_id ASC;"
        );
        load_edges(self.conn, &sql, unit_id)
    }

    fn find_edges_by_target(&self, unit_id: &str) -> LineageStoreResult<Vec<LineageEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS}
             FROM org_unit_mappings m
             JOIN org_unit_mapping_targets t ON t.mapping_id = m.mapping_id
             WHERE t.target_unit_id = ?1
             ORDER BY m.effective_date DESC, m.mapping_id ASC;"
        );
        load_edges(self.conn, &sql, unit_id)
    }
}

impl LineageStore for SqliteLineageStore<'_> {
    fn record_unit_version(&self, unit: &OrgUnitVersion) -> LineageStoreResult<()> {
        let started_at = Instant::now();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let outcome = insert_unit_version(&tx, unit);
        finish_write(tx, outcome, started_at, "record_unit_version", &unit.unit_id)
    }

    fn record_mapping(&self, edge: &LineageEdge) -> LineageStoreResult<()> {
        let started_at = Instant::now();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let outcome = insert_edge(&tx, edge);
        finish_write(tx, outcome, started_at, "record_mapping", &edge.source_unit_id)
    }

    fn record_restructure(
        &self,
        change: &OrgRestructure,
    ) -> LineageStoreResult<Vec<LineageEdge>> {
        let started_at = Instant::now();
        let label = change.source_unit_ids.join(",");
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let outcome = apply_restructure(&tx, change);
        finish_write(tx, outcome, started_at, "record_restructure", &label)
    }

    fn unit_versions(&self, unit_id: &str) -> LineageStoreResult<Vec<OrgUnitVersion>> {
        load_unit_versions(self.conn, unit_id)
    }
}

impl OrgState for SqliteLineageStore<'_> {
    fn get_unit_at(&self, unit_id: &str, at: DateTime<Utc>) -> StateResult<OrgUnitVersion> {
        let at_db = instant_to_db(at);
        let unit = self
            .conn
            .query_row(
                &format!(
                    "SELECT {UNIT_COLUMNS}
                     FROM org_units
                     WHERE unit_id = ?1
                       AND valid_from <= ?2
                       AND (valid_to IS NULL OR valid_to > ?2);"
                ),
                params![unit_id, at_db],
                |row| Ok(parse_unit_row(row)),
            )
            .optional()?;
        match unit {
            Some(parsed) => parsed.map_err(|err| StateError::InvalidData(err.to_string())),
            None => Err(StateError::UnitNotFound {
                unit_id: unit_id.to_string(),
                at,
            }),
        }
    }

    fn find_unit_by_name(&self, name: &str, within: &TimeRange) -> StateResult<UnitLookup> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT unit_id
             FROM org_units
             WHERE unit_name = ?1
               AND valid_from <= ?3
               AND (valid_to IS NULL OR valid_to > ?2)
             ORDER BY unit_id ASC;",
        )?;
        let mut ids = stmt
            .query_map(
                params![
                    name.trim(),
                    instant_to_db(within.from()),
                    instant_to_db(within.to())
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match ids.len() {
            0 => UnitLookup::NotFound,
            1 => UnitLookup::Found(ids.remove(0)),
            _ => UnitLookup::Ambiguous(ids),
        })
    }
}

/// Commits on success, rolls back (by drop) and logs on failure.
fn finish_write<T>(
    tx: Transaction<'_>,
    outcome: LineageStoreResult<T>,
    started_at: Instant,
    operation: &str,
    unit_label: &str,
) -> LineageStoreResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit()?;
            info!(
                "event=lineage_write module=lineage_store status=ok op={operation} units={unit_label} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(value)
        }
        Err(err) => {
            drop(tx);
            if matches!(err, LineageStoreError::Integrity(IntegrityError::CycleDetected { .. })) {
                error!(
                    "event=lineage_write module=lineage_store status=rejected op={operation} units={unit_label} error_code={} error={err}",
                    err.code()
                );
            } else {
                warn!(
                    "event=lineage_write module=lineage_store status=rejected op={operation} units={unit_label} error_code={} error={err}",
                    err.code()
                );
            }
            Err(err)
        }
    }
}

fn apply_restructure(
    conn: &Connection,
    change: &OrgRestructure,
) -> LineageStoreResult<Vec<LineageEdge>> {
    change.validate().map_err(IntegrityError::Invalid)?;
    let effective_date = change.effective_date;

    for source in &change.source_unit_ids {
        let open = load_open_version(conn, source)?;
        match open {
            Some(version) if version.valid_from < effective_date => {}
            _ => {
                return Err(IntegrityError::SourceNotCurrent {
                    unit_id: source.clone(),
                    effective_date,
                }
                .into())
            }
        }
    }

    for source in &change.source_unit_ids {
        conn.execute(
            "UPDATE org_units SET valid_to = ?2 WHERE unit_id = ?1 AND valid_to IS NULL;",
            params![source, instant_to_db(effective_date)],
        )?;
    }

    for target in &change.target_units {
        let is_source = change
            .source_unit_ids
            .iter()
            .any(|source| *source == target.unit_id);
        if !is_source && load_open_version(conn, &target.unit_id)?.is_some() {
            return Err(IntegrityError::TargetAlreadyOpen(target.unit_id.clone()).into());
        }
        insert_unit_version(conn, target)?;
    }

    let edges = change.edges();
    for edge in &edges {
        insert_edge(conn, edge)?;
    }
    Ok(edges)
}

fn insert_unit_version(conn: &Connection, unit: &OrgUnitVersion) -> LineageStoreResult<()> {
    unit.validate().map_err(IntegrityError::Invalid)?;

    if let Some(last) = load_unit_versions(conn, &unit.unit_id)?.pop() {
        match last.valid_to {
            None => {
                return Err(IntegrityError::OverlappingValidity {
                    unit_id: unit.unit_id.clone(),
                    valid_from: unit.valid_from,
                }
                .into())
            }
            Some(closed_at) if unit.valid_from < closed_at => {
                return Err(IntegrityError::OverlappingValidity {
                    unit_id: unit.unit_id.clone(),
                    valid_from: unit.valid_from,
                }
                .into())
            }
            Some(closed_at) if unit.valid_from > closed_at => {
                return Err(IntegrityError::NonContiguousValidity {
                    unit_id: unit.unit_id.clone(),
                    expected_from: closed_at,
                    actual_from: unit.valid_from,
                }
                .into())
            }
            Some(_) => {}
        }
    }

    conn.execute(
        "INSERT INTO org_units (
            unit_id,
            unit_name,
            parent_unit_id,
            unit_path,
            valid_from,
            valid_to
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            unit.unit_id,
            unit.name,
            unit.parent_unit_id,
            unit.path,
            instant_to_db(unit.valid_from),
            unit.valid_to.map(instant_to_db),
        ],
    )?;
    Ok(())
}

fn insert_edge(conn: &Connection, edge: &LineageEdge) -> LineageStoreResult<()> {
    edge.validate().map_err(IntegrityError::Invalid)?;
    let effective_db = instant_to_db(edge.effective_date);

    let duplicate: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM org_unit_mappings WHERE mapping_id = ?1);",
        [edge.mapping_id.to_string()],
        |row| row.get(0),
    )?;
    if duplicate {
        return Err(IntegrityError::DuplicateMapping(edge.mapping_id).into());
    }

    let source_known: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM org_units WHERE unit_id = ?1 AND valid_from < ?2);",
        params![edge.source_unit_id, effective_db],
        |row| row.get(0),
    )?;
    if !source_known {
        return Err(IntegrityError::UnknownSource {
            unit_id: edge.source_unit_id.clone(),
            effective_date: edge.effective_date,
        }
        .into());
    }

    for target in &edge.target_unit_ids {
        let target_present: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM org_units WHERE unit_id = ?1 AND valid_from >= ?2);",
            params![target, effective_db],
            |row| row.get(0),
        )?;
        if !target_present {
            return Err(IntegrityError::DanglingTarget {
                unit_id: target.clone(),
                effective_date: edge.effective_date,
            }
            .into());
        }
    }

    conn.execute(
        "INSERT INTO org_unit_mappings (
            mapping_id,
            source_unit_id,
            relationship_type,
            effective_date,
            description
        ) VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            edge.mapping_id.to_string(),
            edge.source_unit_id,
            edge.relationship.as_str(),
            effective_db,
            edge.description,
        ],
    )?;
    for (position, target) in edge.target_unit_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO org_unit_mapping_targets (mapping_id, target_unit_id, position)
             VALUES (?1, ?2, ?3);",
            params![edge.mapping_id.to_string(), target, position as i64],
        )?;
    }

    // The new edge is visible inside this transaction, so a traversal from
    // its source sees every loop it could close.
    if let Some((unit_id, at)) = find_cycle_from(&SqliteLineageStore::on(conn), &edge.source_unit_id)?
    {
        return Err(IntegrityError::CycleDetected { unit_id, at }.into());
    }
    Ok(())
}

fn load_edges(conn: &Connection, sql: &str, unit_id: &str) -> LineageStoreResult<Vec<LineageEdge>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([unit_id])?;
    let mut edges = Vec::new();
    while let Some(row) = rows.next()? {
        edges.push(parse_edge_row(row)?);
    }
    drop(rows);

    for edge in &mut edges {
        edge.target_unit_ids = load_targets(conn, edge.mapping_id)?;
    }
    Ok(edges)
}

fn load_targets(conn: &Connection, mapping_id: Uuid) -> LineageStoreResult<Vec<UnitId>> {
    let mut stmt = conn.prepare(
        "SELECT target_unit_id
         FROM org_unit_mapping_targets
         WHERE mapping_id = ?1
         ORDER BY position ASC;",
    )?;
    let targets = stmt
        .query_map([mapping_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    if targets.is_empty() {
        return Err(LineageStoreError::InvalidData(format!(
            "mapping {mapping_id} has no targets"
        )));
    }
    Ok(targets)
}

fn load_unit_versions(conn: &Connection, unit_id: &str) -> LineageStoreResult<Vec<OrgUnitVersion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UNIT_COLUMNS}
         FROM org_units
         WHERE unit_id = ?1
         ORDER BY valid_from ASC;"
    ))?;
    let mut rows = stmt.query([unit_id])?;
    let mut versions = Vec::new();
    while let Some(row) = rows.next()? {
        versions.push(parse_unit_row(row)?);
    }
    Ok(versions)
}

fn load_open_version(conn: &Connection, unit_id: &str) -> LineageStoreResult<Option<OrgUnitVersion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UNIT_COLUMNS}
         FROM org_units
         WHERE unit_id = ?1 AND valid_to IS NULL;"
    ))?;
    let mut rows = stmt.query([unit_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_unit_row(row)?)),
        None => Ok(None),
    }
}

fn parse_edge_row(row: &Row<'_>) -> LineageStoreResult<LineageEdge> {
    let mapping_text: String = row.get("mapping_id")?;
    let mapping_id = Uuid::parse_str(&mapping_text).map_err(|_| {
        LineageStoreError::InvalidData(format!(
            "invalid uuid `{mapping_text}` in org_unit_mappings.mapping_id"
        ))
    })?;

    let relationship_text: String = row.get("relationship_type")?;
    let relationship = MappingType::parse(&relationship_text).ok_or_else(|| {
        LineageStoreError::InvalidData(format!(
            "invalid relationship `{relationship_text}` in org_unit_mappings.relationship_type"
        ))
    })?;

    Ok(LineageEdge {
        mapping_id,
        source_unit_id: row.get("source_unit_id")?,
        target_unit_ids: Vec::new(),
        relationship,
        effective_date: parse_instant(row.get("effective_date")?, "org_unit_mappings.effective_date")?,
        description: row.get("description")?,
    })
}

fn parse_unit_row(row: &Row<'_>) -> LineageStoreResult<OrgUnitVersion> {
    Ok(OrgUnitVersion {
        unit_id: row.get("unit_id")?,
        name: row.get("unit_name")?,
        parent_unit_id: row.get("parent_unit_id")?,
        path: row.get("unit_path")?,
        valid_from: parse_instant(row.get("valid_from")?, "org_units.valid_from")?,
        valid_to: row
            .get::<_, Option<i64>>("valid_to")?
            .map(|value| parse_instant(value, "org_units.valid_to"))
            .transpose()?,
    })
}

fn parse_instant(value: i64, column: &'static str) -> LineageStoreResult<DateTime<Utc>> {
    instant_from_db(value).ok_or_else(|| {
        LineageStoreError::InvalidData(format!("invalid instant `{value}` in {column}"))
    })
}
