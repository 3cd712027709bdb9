//! Organizational change ingestion.
//!
//! # Responsibility
//! - Route unit versions, single edges and whole restructures to the
//!   lineage store.
//! - Evict cached closures affected by a recorded change.
//!
//! # Invariants
//! - Cache eviction happens only after the change has committed.
//! - A rejected change evicts nothing.

use crate::lineage::cache::LineageCache;
use crate::model::lineage::{LineageEdge, OrgRestructure};
use crate::model::org_unit::{OrgUnitVersion, UnitId};
use crate::repo::lineage_repo::{LineageStore, LineageStoreResult, SqliteLineageStore};
use log::info;
use rusqlite::Connection;
use std::collections::BTreeSet;

pub struct OrgChangeService<'a> {
    conn: &'a Connection,
    cache: Option<&'a LineageCache>,
}

impl<'a> OrgChangeService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn, cache: None }
    }

    pub fn with_cache(mut self, cache: &'a LineageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Records a unit version. Closures depend only on edges, so no cached
    /// entry is affected.
    pub fn record_unit_version(&self, unit: &OrgUnitVersion) -> LineageStoreResult<()> {
        SqliteLineageStore::try_new(self.conn)?.record_unit_version(unit)
    }

    /// Records one edge between existing unit versions.
    pub fn record_mapping(&self, edge: &LineageEdge) -> LineageStoreResult<()> {
        SqliteLineageStore::try_new(self.conn)?.record_mapping(edge)?;
        self.evict(&edge.touched_units());
        Ok(())
    }

    /// Applies a rename, split or merge atomically and returns its edges.
    pub fn record_organizational_change(
        &self,
        change: &OrgRestructure,
    ) -> LineageStoreResult<Vec<LineageEdge>> {
        let edges = SqliteLineageStore::try_new(self.conn)?.record_restructure(change)?;
        let touched: BTreeSet<UnitId> = edges.iter().flat_map(LineageEdge::touched_units).collect();
        self.evict(&touched);
        info!(
            "event=org_change module=org_change status=ok relationship={} edges={}",
            change.relationship.as_str(),
            edges.len()
        );
        Ok(edges)
    }

    fn evict(&self, touched: &BTreeSet<UnitId>) {
        if let Some(cache) = self.cache {
            cache.invalidate_touching(touched);
        }
    }
}
