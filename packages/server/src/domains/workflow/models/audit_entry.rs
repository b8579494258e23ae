use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};

use super::request::RequestStatus;
use crate::common::{AuditEntryId, MemberId, RequestId, StepId};
use crate::domains::workflow::error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_actor_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditActorKind {
    Approver,
    SystemRepair,
}

/// Who caused a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditActor {
    Approver(MemberId),
    /// Repair executor. Has no member identity.
    SystemRepair,
}

impl AuditActor {
    pub fn kind(self) -> AuditActorKind {
        match self {
            AuditActor::Approver(_) => AuditActorKind::Approver,
            AuditActor::SystemRepair => AuditActorKind::SystemRepair,
        }
    }

    pub fn member_id(self) -> Option<MemberId> {
        match self {
            AuditActor::Approver(id) => Some(id),
            AuditActor::SystemRepair => None,
        }
    }
}

/// Append-only record of one request state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub request_id: RequestId,
    pub actor_kind: AuditActorKind,
    pub actor_id: Option<MemberId>,
    /// Raw action as received: "approve", "reject" or "repair".
    pub action: String,
    pub previous_status: RequestStatus,
    pub previous_step_id: Option<StepId>,
    pub new_status: RequestStatus,
    pub new_step_id: Option<StepId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub request_id: RequestId,
    pub actor: AuditActor,
    pub action: String,
    pub previous_status: RequestStatus,
    pub previous_step_id: Option<StepId>,
    pub new_status: RequestStatus,
    pub new_step_id: Option<StepId>,
}

impl NewAuditEntry {
    /// Materialize the row as the store will persist it.
    pub fn into_entry(self) -> AuditEntry {
        AuditEntry {
            id: AuditEntryId::new(),
            request_id: self.request_id,
            actor_kind: self.actor.kind(),
            actor_id: self.actor.member_id(),
            action: self.action,
            previous_status: self.previous_status,
            previous_step_id: self.previous_step_id,
            new_status: self.new_status,
            new_step_id: self.new_step_id,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl AuditEntry {
    pub async fn insert(&self, conn: &mut PgConnection) -> Result<Self, WorkflowError> {
        let entry = sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO workflow_audit_log
                (id, request_id, actor_kind, actor_id, action,
                 previous_status, previous_step_id, new_status, new_step_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(self.request_id)
        .bind(self.actor_kind)
        .bind(self.actor_id)
        .bind(&self.action)
        .bind(self.previous_status)
        .bind(self.previous_step_id)
        .bind(self.new_status)
        .bind(self.new_step_id)
        .bind(self.created_at)
        .fetch_one(conn)
        .await?;
        Ok(entry)
    }

    pub async fn find_by_request(
        request_id: RequestId,
        conn: &mut PgConnection,
    ) -> Result<Vec<Self>, WorkflowError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT * FROM workflow_audit_log WHERE request_id = $1 ORDER BY created_at, id",
        )
        .bind(request_id)
        .fetch_all(conn)
        .await?;
        Ok(entries)
    }
}
