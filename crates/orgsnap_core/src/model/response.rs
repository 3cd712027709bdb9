//! Survey responses as persisted by the append-only response store.

use crate::model::employee::EmployeeId;
use crate::model::snapshot::SnapshotCore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ResponseId = Uuid;

/// One submitted response with its immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub response_id: ResponseId,
    pub survey_id: String,
    pub employee_id: EmployeeId,
    pub tenant_id: String,
    pub submitted_at: DateTime<Utc>,
    pub snapshot_core: SnapshotCore,
    pub version_id: String,
    pub answers: serde_json::Value,
}

/// What a caller gets back from a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub response_id: ResponseId,
    pub submitted_at: DateTime<Utc>,
}
