//! Dashboard query execution.
//!
//! # Responsibility
//! - Validate caller input, translate filters and execute them against the
//!   response store.
//! - Merge hybrid results with provenance counts.
//!
//! # Invariants
//! - Invalid input is rejected before any storage access.
//! - Lineage reads and every sub-query of one request share one read
//!   transaction, so hybrid halves observe the same committed state.
//! - Hybrid output lists historical matches first, then current-only
//!   matches; a response matched by both appears once, at its first
//!   position.
//! - Cancellation is checked before each sub-query, per fetched row and
//!   before merging, and interrupts a statement that is still running; a
//!   cancelled query returns no partial result.

use crate::config::QueryConfig;
use crate::db::DbError;
use crate::lineage::cache::LineageCache;
use crate::lineage::resolver::{LineageResolver, ResolveError};
use crate::model::query::{
    DashboardQuery, DashboardResult, InvalidArgument, Provenance, ResolvedPredicate,
    ResolvedQuery,
};
use crate::model::response::SurveyResponse;
use crate::model::time_range::TimeRange;
use crate::repo::lineage_repo::{LineageStoreError, SqliteLineageStore};
use crate::repo::response_repo::{ResponseStore, ResponseStoreError, SqliteResponseStore};
use crate::service::filter_translator::FilterTranslator;
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug)]
pub enum QueryError {
    InvalidArgument(InvalidArgument),
    Resolve(ResolveError),
    Store(ResponseStoreError),
    Db(DbError),
    Cancelled,
}

impl QueryError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Resolve(ResolveError::Ambiguous { .. }) => "ambiguous",
            Self::Resolve(ResolveError::CycleDetected { .. }) => "cycle_detected",
            Self::Cancelled => "cancelled",
            Self::Resolve(_) | Self::Store(_) | Self::Db(_) => "storage_error",
        }
    }
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(err) => write!(f, "{err}"),
            Self::Resolve(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Cancelled => write!(f, "dashboard query cancelled"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidArgument(err) => Some(err),
            Self::Resolve(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}

impl From<InvalidArgument> for QueryError {
    fn from(value: InvalidArgument) -> Self {
        Self::InvalidArgument(value)
    }
}

impl From<ResolveError> for QueryError {
    fn from(value: ResolveError) -> Self {
        Self::Resolve(value)
    }
}

impl From<ResponseStoreError> for QueryError {
    fn from(value: ResponseStoreError) -> Self {
        match value {
            ResponseStoreError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}

impl From<LineageStoreError> for QueryError {
    fn from(value: LineageStoreError) -> Self {
        Self::Resolve(ResolveError::Store(value))
    }
}

impl From<DbError> for QueryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Request-scoped dashboard query executor.
pub struct DashboardService<'a> {
    conn: &'a Connection,
    config: &'a QueryConfig,
    cache: Option<&'a LineageCache>,
}

impl<'a> DashboardService<'a> {
    pub fn new(conn: &'a Connection, config: &'a QueryConfig) -> Self {
        Self {
            conn,
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a LineageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validates raw caller input and runs the query.
    pub fn query_dashboard(
        &self,
        filters: &Map<String, Value>,
        filter_mode: &str,
        time_range: TimeRange,
        tenant_id: &str,
    ) -> QueryResult<DashboardResult> {
        let query = DashboardQuery::from_raw(filters, filter_mode, time_range, tenant_id)
            .map_err(|err| {
                warn!(
                    "event=dashboard_query module=dashboard status=rejected error_code=invalid_argument"
                );
                err
            })?;
        self.execute(&query, &CancellationToken::new())
    }

    /// Runs a validated query; `cancel` may be fired from another thread.
    pub fn execute(
        &self,
        query: &DashboardQuery,
        cancel: &CancellationToken,
    ) -> QueryResult<DashboardResult> {
        let started_at = Instant::now();
        let outcome = self.run(query, cancel).map_err(|err| {
            if cancel.is_cancelled() {
                QueryError::Cancelled
            } else {
                err
            }
        });
        match &outcome {
            Ok(result) => info!(
                "event=dashboard_query module=dashboard status=ok mode={} filters={} count={} duration_ms={}",
                query.mode.as_str(),
                query.filters.len(),
                result.count,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=dashboard_query module=dashboard status=error mode={} error_code={} duration_ms={}",
                query.mode.as_str(),
                err.code(),
                started_at.elapsed().as_millis()
            ),
        }
        outcome
    }

    fn run(&self, query: &DashboardQuery, cancel: &CancellationToken) -> QueryResult<DashboardResult> {
        ensure_live(cancel)?;
        // Read before the snapshot is pinned: an eviction racing this
        // request then rejects any closure computed from the older state.
        let generation = self.cache.map(LineageCache::generation);
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        let _interrupt = InterruptOnCancel::install(self.conn, cancel);
        let lineage = SqliteLineageStore::try_new(&tx)?;
        let responses = SqliteResponseStore::try_new(&tx)?;

        let mut resolver = LineageResolver::new(&lineage);
        if let (Some(cache), Some(generation)) = (self.cache, generation) {
            resolver = resolver.with_cache_at(cache, generation);
        }
        let resolved = FilterTranslator::new(resolver).translate(
            &query.filters,
            query.mode,
            &query.time_range,
        )?;

        let result = match resolved {
            ResolvedQuery::Historical(predicate) | ResolvedQuery::Current(predicate) => {
                let rows = self.fetch(&responses, &query.tenant_id, &predicate, cancel)?;
                DashboardResult {
                    count: rows.len(),
                    responses: rows,
                    provenance: None,
                }
            }
            ResolvedQuery::Hybrid {
                historical,
                current,
            } => {
                let historical_rows =
                    self.fetch(&responses, &query.tenant_id, &historical, cancel)?;
                let current_rows = self.fetch(&responses, &query.tenant_id, &current, cancel)?;
                ensure_live(cancel)?;
                merge_hybrid(historical_rows, current_rows, &current)
            }
        };
        tx.commit()?;
        Ok(result)
    }

    fn fetch(
        &self,
        store: &SqliteResponseStore<'_>,
        tenant_id: &str,
        predicate: &ResolvedPredicate,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<SurveyResponse>> {
        ensure_live(cancel)?;
        Ok(store.query(tenant_id, predicate, self.config.max_results, cancel)?)
    }
}

/// VM steps between two checks of the token inside a running statement.
const INTERRUPT_CHECK_OPS: i32 = 1_000;

/// Aborts statements on `conn` once `cancel` fires; removed on drop.
struct InterruptOnCancel<'c> {
    conn: &'c Connection,
}

impl<'c> InterruptOnCancel<'c> {
    fn install(conn: &'c Connection, cancel: &CancellationToken) -> Self {
        let token = AssertUnwindSafe(cancel.clone());
        conn.progress_handler(INTERRUPT_CHECK_OPS, Some(move || token.is_cancelled()));
        Self { conn }
    }
}

impl Drop for InterruptOnCancel<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

fn ensure_live(cancel: &CancellationToken) -> QueryResult<()> {
    if cancel.is_cancelled() {
        return Err(QueryError::Cancelled);
    }
    Ok(())
}

/// Historical rows first, then current rows not already present.
fn merge_hybrid(
    historical: Vec<SurveyResponse>,
    current: Vec<SurveyResponse>,
    current_predicate: &ResolvedPredicate,
) -> DashboardResult {
    let provenance = Provenance {
        historical_count: historical.len(),
        current_count: current.len(),
        historical_units: current_predicate.lineage_units().into_iter().collect(),
    };

    let mut seen = HashSet::with_capacity(historical.len() + current.len());
    let responses: Vec<SurveyResponse> = historical
        .into_iter()
        .chain(current)
        .filter(|response| seen.insert(response.response_id))
        .collect();

    DashboardResult {
        count: responses.len(),
        responses,
        provenance: Some(provenance),
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_hybrid, InterruptOnCancel};
    use crate::db::open_db_in_memory;
    use crate::model::query::{Predicate, ResolvedPredicate};
    use crate::model::response::SurveyResponse;
    use crate::model::snapshot::SnapshotCore;
    use crate::model::time_range::TimeRange;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeSet;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    const LONG_COUNT: &str = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 200000) SELECT count(*) FROM n";

    fn response(id: Uuid, unit_id: &str) -> SurveyResponse {
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        SurveyResponse {
            response_id: id,
            survey_id: "survey_1".to_string(),
            employee_id: "emp_1".to_string(),
            tenant_id: "acme".to_string(),
            submitted_at: at,
            snapshot_core: SnapshotCore {
                employee_name: "Ana".to_string(),
                employee_email: "ana@example.com".to_string(),
                department: "Sales".to_string(),
                unit_id: unit_id.to_string(),
                unit_path: "root.sales".to_string(),
                performance_grade: "A".to_string(),
                role: "Manager".to_string(),
                age: 33,
                tenure: 4.7,
                snapshot_version: "1.0".to_string(),
                snapshot_time: "2024-03-15T10:00:00.000Z".to_string(),
            },
            version_id: "emp_1_1710496800".to_string(),
            answers: json!({}),
        }
    }

    #[test]
    fn merge_keeps_first_occurrence_and_counts_each_path() {
        let shared = Uuid::new_v4();
        let historical = vec![response(shared, "unit_123")];
        let current = vec![
            response(shared, "unit_123"),
            response(Uuid::new_v4(), "unit_456"),
        ];
        let units: BTreeSet<String> = ["unit_456", "unit_123"].map(String::from).into();
        let predicate = ResolvedPredicate {
            predicates: vec![Predicate::UnitIdIn(units)],
            time_range: TimeRange::at(Utc::now()),
        };

        let merged = merge_hybrid(historical, current, &predicate);

        assert_eq!(merged.count, 2);
        assert_eq!(merged.responses[0].response_id, shared);
        let provenance = merged.provenance.unwrap();
        assert_eq!(provenance.historical_count, 1);
        assert_eq!(provenance.current_count, 2);
        assert_eq!(provenance.historical_units, vec!["unit_123", "unit_456"]);
    }

    #[test]
    fn fired_token_interrupts_a_running_statement() {
        let conn = open_db_in_memory().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        {
            let _interrupt = InterruptOnCancel::install(&conn, &cancel);
            let err = conn
                .query_row(LONG_COUNT, [], |row| row.get::<_, i64>(0))
                .unwrap_err();
            assert_eq!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::OperationInterrupted)
            );
        }

        let count: i64 = conn.query_row(LONG_COUNT, [], |row| row.get(0)).unwrap();
        assert_eq!(count, 200_000);
    }
}
