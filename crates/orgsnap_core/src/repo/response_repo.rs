//! Append-only survey response store.
//!
//! # Responsibility
//! - Persist responses together with their serialized snapshot payload.
//! - Execute resolved dashboard predicates against stored snapshots.
//!
//! # Invariants
//! - Rows are never updated or deleted (enforced by schema triggers).
//! - `append` runs on the caller's connection or transaction; it never
//!   opens its own, so capture and append can share one transaction.
//! - Query results are ordered `submitted_at DESC, response_id ASC`.

use crate::db::codec::{instant_from_db, instant_to_db};
use crate::db::migrations::ensure_current;
use crate::db::DbError;
use crate::model::query::{FilterScalar, Predicate, ResolvedPredicate};
use crate::model::response::{ResponseId, SurveyResponse};
use crate::model::snapshot::SnapshotCore;
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type ResponseStoreResult<T> = Result<T, ResponseStoreError>;

#[derive(Debug)]
pub enum ResponseStoreError {
    Db(DbError),
    /// A response with this id is already stored.
    Duplicate(ResponseId),
    /// Snapshot or answers could not be (de)serialized.
    Payload(serde_json::Error),
    InvalidData(String),
    /// The caller's cancellation token fired mid-query.
    Cancelled,
}

impl Display for ResponseStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Duplicate(id) => write!(f, "response already stored: {id}"),
            Self::Payload(err) => write!(f, "invalid response payload: {err}"),
            Self::InvalidData(message) => write!(f, "invalid response data: {message}"),
            Self::Cancelled => write!(f, "response query cancelled"),
        }
    }
}

impl Error for ResponseStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Payload(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ResponseStoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ResponseStoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for ResponseStoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Payload(value)
    }
}

/// Response persistence and predicate execution.
pub trait ResponseStore {
    fn append(&self, response: &SurveyResponse) -> ResponseStoreResult<()>;
    fn get(&self, response_id: ResponseId) -> ResponseStoreResult<Option<SurveyResponse>>;
    /// Responses of `tenant_id` matching `predicate`, newest first, at most
    /// `limit` rows.
    fn query(
        &self,
        tenant_id: &str,
        predicate: &ResolvedPredicate,
        limit: u32,
        cancel: &CancellationToken,
    ) -> ResponseStoreResult<Vec<SurveyResponse>>;
}

pub struct SqliteResponseStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteResponseStore<'conn> {
    pub fn try_new(conn: &'conn Connection) -> ResponseStoreResult<Self> {
        ensure_current(conn)?;
        Ok(Self { conn })
    }
}

const RESPONSE_COLUMNS: &str = "response_id,
    survey_id,
    employee_id,
    tenant_id,
    submitted_at,
    snapshot_core,
    version_id,
    answers";

impl ResponseStore for SqliteResponseStore<'_> {
    fn append(&self, response: &SurveyResponse) -> ResponseStoreResult<()> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM survey_responses WHERE response_id = ?1);",
            [response.response_id.to_string()],
            |row| row.get(0),
        )?;
        if exists {
            return Err(ResponseStoreError::Duplicate(response.response_id));
        }

        self.conn.execute(
            "INSERT INTO survey_responses (
                response_id,
                survey_id,
                employee_id,
                tenant_id,
                submitted_at,
                snapshot_core,
                version_id,
                answers
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                response.response_id.to_string(),
                response.survey_id,
                response.employee_id,
                response.tenant_id,
                instant_to_db(response.submitted_at),
                response.snapshot_core.to_payload()?,
                response.version_id,
                serde_json::to_string(&response.answers)?,
            ],
        )?;
        Ok(())
    }

    fn get(&self, response_id: ResponseId) -> ResponseStoreResult<Option<SurveyResponse>> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RESPONSE_COLUMNS}
                     FROM survey_responses
                     WHERE response_id = ?1;"
                ),
                [response_id.to_string()],
                |row| Ok(parse_response_row(row)),
            )
            .optional()?;
        found.transpose()
    }

    fn query(
        &self,
        tenant_id: &str,
        predicate: &ResolvedPredicate,
        limit: u32,
        cancel: &CancellationToken,
    ) -> ResponseStoreResult<Vec<SurveyResponse>> {
        if predicate.is_unsatisfiable() {
            return Ok(Vec::new());
        }

        let (sql, values) = build_query(tenant_id, predicate, limit);
        debug!(
            "event=response_query module=response_store status=start predicates={} limit={limit}",
            predicate.predicates.len()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut responses = Vec::new();
        while let Some(row) = rows.next()? {
            if cancel.is_cancelled() {
                return Err(ResponseStoreError::Cancelled);
            }
            responses.push(parse_response_row(row)?);
        }
        Ok(responses)
    }
}

/// Builds the parameterised SELECT for one resolved predicate. Field names
/// come from the closed filter field set, never from caller text.
fn build_query(
    tenant_id: &str,
    predicate: &ResolvedPredicate,
    limit: u32,
) -> (String, Vec<SqlValue>) {
    let mut values = vec![
        SqlValue::Text(tenant_id.to_string()),
        SqlValue::Integer(instant_to_db(predicate.time_range.from())),
        SqlValue::Integer(instant_to_db(predicate.time_range.to())),
    ];
    let mut clauses = vec![
        "tenant_id = ?".to_string(),
        "submitted_at BETWEEN ? AND ?".to_string(),
    ];

    for item in &predicate.predicates {
        let (key, operands): (&str, Vec<SqlValue>) = match item {
            Predicate::Matches { field, values } => (
                field.snapshot_key(),
                values.iter().map(scalar_to_sql).collect(),
            ),
            Predicate::UnitIdIn(units) => (
                "unit_id",
                units.iter().cloned().map(SqlValue::Text).collect(),
            ),
        };
        let placeholders = vec!["?"; operands.len()].join(", ");
        clauses.push(format!(
            "json_extract(snapshot_core, '$.{key}') IN ({placeholders})"
        ));
        values.extend(operands);
    }
    values.push(SqlValue::Integer(i64::from(limit)));

    let sql = format!(
        "SELECT {RESPONSE_COLUMNS}
         FROM survey_responses
         WHERE {}
         ORDER BY submitted_at DESC, response_id ASC
         LIMIT ?;",
        clauses.join("\n           AND ")
    );
    (sql, values)
}

fn scalar_to_sql(value: &FilterScalar) -> SqlValue {
    match value {
        FilterScalar::Text(text) => SqlValue::Text(text.clone()),
        FilterScalar::Integer(number) => SqlValue::Integer(*number),
        FilterScalar::Number(number) => SqlValue::Real(*number),
    }
}

fn parse_response_row(row: &Row<'_>) -> ResponseStoreResult<SurveyResponse> {
    let id_text: String = row.get("response_id")?;
    let response_id = Uuid::parse_str(&id_text).map_err(|_| {
        ResponseStoreError::InvalidData(format!(
            "invalid uuid `{id_text}` in survey_responses.response_id"
        ))
    })?;
    let submitted_raw: i64 = row.get("submitted_at")?;
    let submitted_at = instant_from_db(submitted_raw).ok_or_else(|| {
        ResponseStoreError::InvalidData(format!(
            "invalid instant `{submitted_raw}` in survey_responses.submitted_at"
        ))
    })?;
    let snapshot_text: String = row.get("snapshot_core")?;
    let answers_text: String = row.get("answers")?;

    Ok(SurveyResponse {
        response_id,
        survey_id: row.get("survey_id")?,
        employee_id: row.get("employee_id")?,
        tenant_id: row.get("tenant_id")?,
        submitted_at,
        snapshot_core: SnapshotCore::from_payload(&snapshot_text)?,
        version_id: row.get("version_id")?,
        answers: serde_json::from_str(&answers_text)?,
    })
}
