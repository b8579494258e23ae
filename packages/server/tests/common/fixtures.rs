//! Test fixtures for creating workflows and requests.
//!
//! These fixtures go through the model methods and actions directly.

use anyhow::Result;
use approval_core::common::{MemberId, RequestId, StepId};
use approval_core::domains::workflow::actions::{advance, submit, AdvanceInput, SubmitInput};
use approval_core::domains::workflow::models::{
    ApprovalAction, RequestStatus, StepType, WorkflowDefinition, WorkflowStep,
};
use approval_core::domains::workflow::store::PgWorkflowStore;
use sqlx::PgPool;

pub struct TestWorkflow {
    pub definition: WorkflowDefinition,
    pub steps: Vec<WorkflowStep>,
}

impl TestWorkflow {
    pub fn act(
        &self,
        request_id: RequestId,
        step_index: usize,
        action: ApprovalAction,
    ) -> AdvanceInput {
        AdvanceInput {
            request_id,
            current_step_id: self.steps[step_index].id,
            action,
            actor_id: self.steps[step_index].approver_id,
            comments: None,
        }
    }
}

/// Create a workflow with one step per entry, each with its own approver.
pub async fn create_workflow(pool: &PgPool, chain: &[(StepType, bool)]) -> Result<TestWorkflow> {
    let definition = WorkflowDefinition::new("expense approval");
    let steps = chain
        .iter()
        .enumerate()
        .map(|(index, (step_type, is_required))| {
            WorkflowStep::builder()
                .workflow_id(definition.id)
                .order(index as i32 + 1)
                .step_type(*step_type)
                .name(format!("step {}", index + 1))
                .approver_id(MemberId::new())
                .is_required(*is_required)
                .build()
        })
        .collect();

    let steps = definition.create_with_steps(steps, pool).await?;
    Ok(TestWorkflow { definition, steps })
}

/// decision, opinion, decision; all required.
pub async fn create_decision_opinion_decision(pool: &PgPool) -> Result<TestWorkflow> {
    create_workflow(
        pool,
        &[
            (StepType::Decision, true),
            (StepType::Opinion, true),
            (StepType::Decision, true),
        ],
    )
    .await
}

pub async fn submit_request(store: &PgWorkflowStore, workflow: &TestWorkflow) -> Result<RequestId> {
    let request = submit(
        store,
        SubmitInput {
            workflow_id: workflow.definition.id,
            form_data: serde_json::json!({"amount": 480, "cost_center": "ops"}),
            submitted_by: Some(MemberId::new()),
        },
    )
    .await?;
    Ok(request.id)
}

/// Approve step 1 and step 3 but leave the request pointing at step 3,
/// as a partially applied legacy update would.
pub async fn create_stuck_request(
    pool: &PgPool,
    store: &PgWorkflowStore,
    workflow: &TestWorkflow,
) -> Result<RequestId> {
    let request_id = submit_request(store, workflow).await?;
    advance(store, workflow.act(request_id, 0, ApprovalAction::Approve)).await?;
    advance(store, workflow.act(request_id, 1, ApprovalAction::Approve)).await?;

    sqlx::query(
        r#"
        INSERT INTO request_approvals (id, request_id, step_id, approver_id, status, decided_at)
        VALUES ($1, $2, $3, $4, 'approved', NOW())
        "#,
    )
    .bind(uuid::Uuid::now_v7())
    .bind(request_id)
    .bind(workflow.steps[2].id)
    .bind(workflow.steps[2].approver_id)
    .execute(pool)
    .await?;

    Ok(request_id)
}

pub async fn set_request_state(
    pool: &PgPool,
    request_id: RequestId,
    status: RequestStatus,
    current_step_id: Option<StepId>,
) -> Result<()> {
    sqlx::query("UPDATE workflow_requests SET status = $2, current_step_id = $3 WHERE id = $1")
        .bind(request_id)
        .bind(status)
        .bind(current_step_id)
        .execute(pool)
        .await?;
    Ok(())
}
