//! Point-in-time employee snapshots and organizational lineage for survey
//! analytics.
//!
//! Responses carry an immutable snapshot of the submitter taken at
//! submission time. Dashboards filter either by that recorded context or,
//! through the lineage graph of renames, merges and splits, by today's
//! organization.

pub mod config;
pub mod db;
pub mod lineage;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_config, DbError, DbResult};
pub use lineage::{LineageCache, LineageResolver, ResolveError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::lineage::{Direction, LineageEdge, MappingType, OrgRestructure};
pub use model::query::{DashboardQuery, DashboardResult, FilterMode, Provenance};
pub use model::response::{SubmissionReceipt, SurveyResponse};
pub use model::snapshot::{Snapshot, SnapshotCore};
pub use model::time_range::TimeRange;
pub use service::dashboard_service::{DashboardService, QueryError};
pub use service::org_change_service::OrgChangeService;
pub use service::response_service::{ResponseService, SubmitError, SubmitRequest};
pub use service::snapshot_service::{capture_snapshot, CaptureError};
pub use tokio_util::sync::CancellationToken;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
