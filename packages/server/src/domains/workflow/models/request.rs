use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};

use crate::common::{MemberId, RequestId, StepId, WorkflowId};
use crate::domains::workflow::error::WorkflowError;

/// Request status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Rejected,
}

impl RequestStatus {
    /// Completed and rejected are final; nothing moves a request out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Rejected)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::InProgress => write!(f, "in_progress"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A submitted item moving through a workflow.
///
/// `current_step_id` is `None` once the request is terminal. `form_data` is
/// the business payload; the engine stores and returns it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    pub workflow_id: Option<WorkflowId>,
    pub status: RequestStatus,
    pub current_step_id: Option<StepId>,
    pub form_data: serde_json::Value,
    pub submitted_by: Option<MemberId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a request on submission.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub workflow_id: WorkflowId,
    pub current_step_id: Option<StepId>,
    pub form_data: serde_json::Value,
    pub submitted_by: Option<MemberId>,
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Request {
    pub async fn find_by_id(
        id: RequestId,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>, WorkflowError> {
        let request =
            sqlx::query_as::<_, Request>("SELECT * FROM workflow_requests WHERE id = $1")
                .bind(id)
                .fetch_optional(conn)
                .await?;
        Ok(request)
    }

    /// Load and row-lock a request for the rest of the enclosing transaction.
    ///
    /// Concurrent transitions on the same request queue up here, so the
    /// read of `current_step_id` and the write of the new state serialize.
    pub async fn find_by_id_for_update(
        id: RequestId,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>, WorkflowError> {
        let request = sqlx::query_as::<_, Request>(
            "SELECT * FROM workflow_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(request)
    }

    pub async fn create(new: &NewRequest, conn: &mut PgConnection) -> Result<Self, WorkflowError> {
        let request = sqlx::query_as::<_, Request>(
            r#"
            INSERT INTO workflow_requests (id, workflow_id, status, current_step_id, form_data, submitted_by)
            VALUES ($1, $2, 'pending', $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(RequestId::new())
        .bind(new.workflow_id)
        .bind(new.current_step_id)
        .bind(&new.form_data)
        .bind(new.submitted_by)
        .fetch_one(conn)
        .await?;
        Ok(request)
    }

    /// Set the workflow-state fields. Everything else is left as stored.
    pub async fn update_state(
        id: RequestId,
        status: RequestStatus,
        current_step_id: Option<StepId>,
        conn: &mut PgConnection,
    ) -> Result<Self, WorkflowError> {
        let request = sqlx::query_as::<_, Request>(
            r#"
            UPDATE workflow_requests
            SET status = $2, current_step_id = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(current_step_id)
        .fetch_one(conn)
        .await?;
        Ok(request)
    }

    /// Requests whose stored state could be divergent: anything still open,
    /// plus terminal rows that kept a step pointer or lost their workflow.
    pub async fn find_suspect_ids(
        limit: i64,
        conn: &mut PgConnection,
    ) -> Result<Vec<RequestId>, WorkflowError> {
        let ids = sqlx::query_scalar::<_, RequestId>(
            r#"
            SELECT id FROM workflow_requests
            WHERE status IN ('pending', 'in_progress')
               OR current_step_id IS NOT NULL
               OR workflow_id IS NULL
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(conn)
        .await?;
        Ok(ids)
    }
}
