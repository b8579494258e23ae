use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};

use crate::common::{ApprovalId, MemberId, RequestId, StepId};
use crate::domains::workflow::error::WorkflowError;

/// What an approver did on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

impl ApprovalAction {
    /// The approval status this action records.
    pub fn decided_status(self) -> ApprovalStatus {
        match self {
            ApprovalAction::Approve => ApprovalStatus::Approved,
            ApprovalAction::Reject => ApprovalStatus::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Reject => "reject",
        }
    }
}

impl std::fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "approval_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    /// The action that produced this status, if one has been taken.
    pub fn decided_action(self) -> Option<ApprovalAction> {
        match self {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Approved => Some(ApprovalAction::Approve),
            ApprovalStatus::Rejected => Some(ApprovalAction::Reject),
        }
    }

    pub fn is_decided(self) -> bool {
        self != ApprovalStatus::Pending
    }
}

/// One row per (request, step) actually reached. Decided at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RequestApproval {
    pub id: ApprovalId,
    pub request_id: RequestId,
    pub step_id: StepId,
    pub approver_id: MemberId,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// A decision to record against the (request, step) approval row.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub request_id: RequestId,
    pub step_id: StepId,
    pub approver_id: MemberId,
    pub action: ApprovalAction,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries
// =============================================================================

impl RequestApproval {
    pub async fn find_for_step(
        request_id: RequestId,
        step_id: StepId,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>, WorkflowError> {
        let approval = sqlx::query_as::<_, RequestApproval>(
            "SELECT * FROM request_approvals WHERE request_id = $1 AND step_id = $2",
        )
        .bind(request_id)
        .bind(step_id)
        .fetch_optional(conn)
        .await?;
        Ok(approval)
    }

    /// Full approval history of a request, oldest first.
    pub async fn find_by_request(
        request_id: RequestId,
        conn: &mut PgConnection,
    ) -> Result<Vec<Self>, WorkflowError> {
        let approvals = sqlx::query_as::<_, RequestApproval>(
            "SELECT * FROM request_approvals WHERE request_id = $1 ORDER BY created_at, id",
        )
        .bind(request_id)
        .fetch_all(conn)
        .await?;
        Ok(approvals)
    }

    /// Create-or-decide the approval row.
    ///
    /// A row that is already decided is left alone and returned as stored.
    pub async fn record_decision(
        decision: &ApprovalDecision,
        conn: &mut PgConnection,
    ) -> Result<Self, WorkflowError> {
        let approval = sqlx::query_as::<_, RequestApproval>(
            r#"
            INSERT INTO request_approvals
                (id, request_id, step_id, approver_id, status, comments, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (request_id, step_id) DO UPDATE
                SET status = EXCLUDED.status,
                    comments = EXCLUDED.comments,
                    decided_at = EXCLUDED.decided_at
                WHERE request_approvals.status = 'pending'
            RETURNING *
            "#,
        )
        .bind(ApprovalId::new())
        .bind(decision.request_id)
        .bind(decision.step_id)
        .bind(decision.approver_id)
        .bind(decision.action.decided_status())
        .bind(&decision.comments)
        .bind(decision.decided_at)
        .fetch_optional(&mut *conn)
        .await?;

        match approval {
            Some(approval) => Ok(approval),
            // ON CONFLICT ... WHERE skipped the update: already decided
            None => Self::find_for_step(decision.request_id, decision.step_id, conn)
                .await?
                .ok_or_else(|| WorkflowError::not_found("approval", decision.step_id)),
        }
    }
}
