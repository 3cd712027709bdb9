//! Survey response submission.
//!
//! # Responsibility
//! - Capture the submitting employee's snapshot and append the response in
//!   one transaction.
//!
//! # Invariants
//! - Capture and append commit together or not at all.
//! - The submission instant is truncated to milliseconds, so the stored
//!   `submitted_at` equals the snapshot's `snapshot_time`.
//! - A stored response is never modified.

use crate::config::SnapshotConfig;
use crate::db::codec::truncate_to_millis;
use crate::db::DbError;
use crate::model::employee::EmployeeId;
use crate::model::query::InvalidArgument;
use crate::model::response::{ResponseId, SubmissionReceipt, SurveyResponse};
use crate::repo::employee_repo::SqliteEmployeeRepository;
use crate::repo::lineage_repo::SqliteLineageStore;
use crate::repo::response_repo::{ResponseStore, ResponseStoreError, SqliteResponseStore};
use crate::service::snapshot_service::{CaptureError, SnapshotService};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

pub type SubmitResult<T> = Result<T, SubmitError>;

#[derive(Debug)]
pub enum SubmitError {
    InvalidArgument(InvalidArgument),
    Capture(CaptureError),
    Store(ResponseStoreError),
    Db(DbError),
}

impl SubmitError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Capture(CaptureError::EmployeeNotFound(_)) => "not_found",
            Self::Capture(_) | Self::Store(_) | Self::Db(_) => "submission_failed",
        }
    }
}

impl Display for SubmitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(err) => write!(f, "{err}"),
            Self::Capture(err) => write!(f, "submission failed: {err}"),
            Self::Store(err) => write!(f, "submission failed: {err}"),
            Self::Db(err) => write!(f, "submission failed: {err}"),
        }
    }
}

impl Error for SubmitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidArgument(err) => Some(err),
            Self::Capture(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Db(err) => Some(err),
        }
    }
}

impl From<CaptureError> for SubmitError {
    fn from(value: CaptureError) -> Self {
        Self::Capture(value)
    }
}

impl From<ResponseStoreError> for SubmitError {
    fn from(value: ResponseStoreError) -> Self {
        Self::Store(value)
    }
}

impl From<DbError> for SubmitError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SubmitError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Caller input for one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub survey_id: String,
    pub employee_id: EmployeeId,
    pub tenant_id: String,
    /// Answers keyed by question id.
    pub answers: Value,
}

impl SubmitRequest {
    fn validate(&self) -> Result<(), InvalidArgument> {
        for (field, value) in [
            ("survey_id", &self.survey_id),
            ("employee_id", &self.employee_id),
            ("tenant_id", &self.tenant_id),
        ] {
            if value.trim().is_empty() {
                return Err(InvalidArgument::new(format!("{field} must not be blank")));
            }
        }
        if !self.answers.is_object() {
            return Err(InvalidArgument::new("answers must be a JSON object"));
        }
        Ok(())
    }
}

pub struct ResponseService<'a> {
    conn: &'a Connection,
    config: &'a SnapshotConfig,
}

impl<'a> ResponseService<'a> {
    pub fn new(conn: &'a Connection, config: &'a SnapshotConfig) -> Self {
        Self { conn, config }
    }

    /// Submits at the current instant.
    pub fn submit_response(&self, request: &SubmitRequest) -> SubmitResult<SubmissionReceipt> {
        self.submit_response_at(request, Utc::now())
    }

    /// Submits as of `at` (truncated to milliseconds).
    pub fn submit_response_at(
        &self,
        request: &SubmitRequest,
        at: DateTime<Utc>,
    ) -> SubmitResult<SubmissionReceipt> {
        let started_at = Instant::now();
        let outcome = self.submit_in_transaction(request, truncate_to_millis(at));
        match &outcome {
            Ok(receipt) => info!(
                "event=response_submit module=response status=ok response_id={} duration_ms={}",
                receipt.response_id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=response_submit module=response status=error error_code={} duration_ms={}",
                err.code(),
                started_at.elapsed().as_millis()
            ),
        }
        outcome
    }

    pub fn get_response(&self, response_id: ResponseId) -> SubmitResult<Option<SurveyResponse>> {
        Ok(SqliteResponseStore::try_new(self.conn)?.get(response_id)?)
    }

    fn submit_in_transaction(
        &self,
        request: &SubmitRequest,
        submitted_at: DateTime<Utc>,
    ) -> SubmitResult<SubmissionReceipt> {
        request.validate().map_err(SubmitError::InvalidArgument)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let employees = SqliteEmployeeRepository::try_new(&tx).map_err(CaptureError::from)?;
        let org = SqliteLineageStore::on(&tx);
        let snapshot = SnapshotService::new(&employees, &org, self.config)
            .capture_at(&request.employee_id, submitted_at)?;

        let response = SurveyResponse {
            response_id: Uuid::new_v4(),
            survey_id: request.survey_id.clone(),
            employee_id: request.employee_id.clone(),
            tenant_id: request.tenant_id.clone(),
            submitted_at,
            snapshot_core: snapshot.core,
            version_id: snapshot.version_id,
            answers: request.answers.clone(),
        };
        SqliteResponseStore::try_new(&tx)?.append(&response)?;
        tx.commit()?;

        Ok(SubmissionReceipt {
            response_id: response.response_id,
            submitted_at,
        })
    }
}
