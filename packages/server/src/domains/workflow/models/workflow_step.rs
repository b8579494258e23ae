use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use typed_builder::TypedBuilder;

use super::request_approval::ApprovalAction;
use crate::common::{MemberId, StepId, WorkflowId};
use crate::domains::workflow::error::WorkflowError;

// ============================================================================
// Step type
// ============================================================================

/// How a step participates in progression.
///
/// All step-kind dispatch goes through [`StepType::advances`] and
/// [`StepType::is_gating`]; nothing else in the engine matches on the variant
/// to decide whether a request moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "workflow_step_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Gating approval. Rejection halts the whole request.
    Decision,
    /// Advisory. Recorded, but never blocks progression.
    Opinion,
    /// Informational. Auto-advances on either action.
    Notification,
}

impl StepType {
    /// Whether `action` on a step of this type moves the request forward.
    pub fn advances(self, action: ApprovalAction) -> bool {
        match self {
            StepType::Decision => action == ApprovalAction::Approve,
            StepType::Opinion | StepType::Notification => true,
        }
    }

    /// Gating steps count towards completion and can halt a request.
    pub fn is_gating(self) -> bool {
        matches!(self, StepType::Decision)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepType::Decision => write!(f, "decision"),
            StepType::Opinion => write!(f, "opinion"),
            StepType::Notification => write!(f, "notification"),
        }
    }
}

// ============================================================================
// Workflow step
// ============================================================================

/// One step of a workflow definition. Steps are totally ordered by `order`
/// within their workflow and are never edited once the workflow is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    #[builder(default = StepId::new())]
    pub id: StepId,
    pub workflow_id: WorkflowId,
    #[sqlx(rename = "step_order")]
    #[serde(rename = "order")]
    pub order: i32,
    pub step_type: StepType,
    #[builder(default)]
    pub name: String,
    pub approver_id: MemberId,
    #[builder(default = true)]
    pub is_required: bool,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries
// =============================================================================

impl WorkflowStep {
    /// All steps of a workflow in progression order.
    pub async fn find_by_workflow(
        workflow_id: WorkflowId,
        conn: &mut PgConnection,
    ) -> Result<Vec<Self>, WorkflowError> {
        let steps = sqlx::query_as::<_, WorkflowStep>(
            "SELECT * FROM workflow_steps WHERE workflow_id = $1 ORDER BY step_order",
        )
        .bind(workflow_id)
        .fetch_all(conn)
        .await?;
        Ok(steps)
    }

    pub async fn insert(&self, conn: &mut PgConnection) -> Result<Self, WorkflowError> {
        let step = sqlx::query_as::<_, WorkflowStep>(
            r#"
            INSERT INTO workflow_steps
                (id, workflow_id, step_order, step_type, name, approver_id, is_required, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(self.workflow_id)
        .bind(self.order)
        .bind(self.step_type)
        .bind(&self.name)
        .bind(self.approver_id)
        .bind(self.is_required)
        .bind(self.created_at)
        .fetch_one(conn)
        .await?;
        Ok(step)
    }
}

/// Rejects step lists that share an `order` value or belong to another
/// workflow. Returns the steps sorted by `order`.
pub fn validate_steps(
    workflow_id: WorkflowId,
    mut steps: Vec<WorkflowStep>,
) -> Result<Vec<WorkflowStep>, WorkflowError> {
    steps.sort_by_key(|step| step.order);

    if let Some(foreign) = steps.iter().find(|step| step.workflow_id != workflow_id) {
        return Err(WorkflowError::InvalidInput(format!(
            "step {} belongs to workflow {}, not {}",
            foreign.id, foreign.workflow_id, workflow_id
        )));
    }

    if let Some(pair) = steps.windows(2).find(|pair| pair[0].order == pair[1].order) {
        return Err(WorkflowError::InvalidInput(format!(
            "steps {} and {} share order {}",
            pair[0].id, pair[1].id, pair[0].order
        )));
    }

    Ok(steps)
}
