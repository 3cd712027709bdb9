//! Process-local memo of resolved lineage closures.
//!
//! # Invariants
//! - Entries are keyed by `(anchor, direction, window end)`.
//! - Recording an edge evicts exactly the entries whose resolved set
//!   contains a unit the edge touches; unrelated entries survive.
//! - A closure computed before an eviction is never inserted after it:
//!   every eviction bumps a generation counter that inserts must match.

use crate::config::LineageConfig;
use crate::model::lineage::Direction;
use crate::model::org_unit::UnitId;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub anchor: UnitId,
    pub direction: Direction,
    pub window_end: DateTime<Utc>,
}

/// Shared, thread-safe closure cache. Readers do not block each other.
#[derive(Debug, Default)]
pub struct LineageCache {
    entries: RwLock<HashMap<CacheKey, Arc<BTreeSet<UnitId>>>>,
    generation: AtomicU64,
}

impl LineageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when caching is disabled by `config`.
    pub fn from_config(config: &LineageConfig) -> Option<Self> {
        config.cache_enabled.then(Self::new)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<BTreeSet<UnitId>>> {
        self.entries.read().get(key).cloned()
    }

    /// Current generation; pass it back to [`Self::insert_if_unchanged`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stores `units` unless an eviction happened since `seen_generation`.
    pub fn insert_if_unchanged(
        &self,
        key: CacheKey,
        units: BTreeSet<UnitId>,
        seen_generation: u64,
    ) -> bool {
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::Acquire) != seen_generation {
            return false;
        }
        entries.insert(key, Arc::new(units));
        true
    }

    /// Evicts every entry whose resolved set intersects `touched`.
    /// Returns the number of evicted entries.
    pub fn invalidate_touching(&self, touched: &BTreeSet<UnitId>) -> usize {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let before = entries.len();
        entries.retain(|_, units| units.is_disjoint(touched));
        let evicted = before - entries.len();
        debug!(
            "event=lineage_cache_invalidate module=lineage_cache status=ok touched={} evicted={evicted}",
            touched.len()
        );
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheKey, LineageCache};
    use crate::config::LineageConfig;
    use crate::model::lineage::Direction;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn key(anchor: &str) -> CacheKey {
        CacheKey {
            anchor: anchor.to_string(),
            direction: Direction::ToHistorical,
            window_end: Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
        }
    }

    fn units(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn invalidation_evicts_only_intersecting_entries() {
        let cache = LineageCache::new();
        let generation = cache.generation();
        assert!(cache.insert_if_unchanged(key("unit_456"), units(&["unit_456", "unit_123"]), generation));
        assert!(cache.insert_if_unchanged(key("unit_900"), units(&["unit_900"]), generation));

        let evicted = cache.invalidate_touching(&units(&["unit_123", "unit_777"]));

        assert_eq!(evicted, 1);
        assert!(cache.get(&key("unit_456")).is_none());
        assert!(cache.get(&key("unit_900")).is_some());
    }

    #[test]
    fn stale_insert_after_invalidation_is_dropped() {
        let cache = LineageCache::new();
        let seen = cache.generation();
        cache.invalidate_touching(&units(&["unit_1"]));

        assert!(!cache.insert_if_unchanged(key("unit_1"), units(&["unit_1"]), seen));
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_config_yields_no_cache() {
        let mut config = LineageConfig::default();
        assert!(LineageCache::from_config(&config).is_some());

        config.cache_enabled = false;
        assert!(LineageCache::from_config(&config).is_none());
    }
}
