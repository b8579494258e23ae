//! Shared setup for action tests, backed by the in-memory store.

use crate::common::{MemberId, RequestId};
use crate::domains::workflow::actions::submit::{submit, SubmitInput};
use crate::domains::workflow::models::{StepType, WorkflowDefinition, WorkflowStep};
use crate::domains::workflow::store::MemoryWorkflowStore;

pub(crate) struct Fixture {
    pub store: MemoryWorkflowStore,
    pub workflow: WorkflowDefinition,
    pub steps: Vec<WorkflowStep>,
}

pub(crate) struct SubmittedRequest {
    pub id: RequestId,
    pub steps: Vec<WorkflowStep>,
}

impl Fixture {
    /// One step per entry, in order, each with its own approver.
    pub async fn with_steps(chain: &[(StepType, bool)]) -> Self {
        let store = MemoryWorkflowStore::new();
        let workflow = WorkflowDefinition::new("purchase approval");
        let steps = chain
            .iter()
            .enumerate()
            .map(|(index, (step_type, is_required))| {
                WorkflowStep::builder()
                    .workflow_id(workflow.id)
                    .order(index as i32 + 1)
                    .step_type(*step_type)
                    .name(format!("step {}", index + 1))
                    .approver_id(MemberId::new())
                    .is_required(*is_required)
                    .build()
            })
            .collect();
        let steps = store
            .create_workflow(workflow.clone(), steps)
            .await
            .expect("fixture workflow is valid");

        Self {
            store,
            workflow,
            steps,
        }
    }

    pub async fn decision_opinion_decision() -> Self {
        Self::with_steps(&[
            (StepType::Decision, true),
            (StepType::Opinion, true),
            (StepType::Decision, true),
        ])
        .await
    }

    pub async fn submit(&self) -> SubmittedRequest {
        let request = submit(
            &self.store,
            SubmitInput {
                workflow_id: self.workflow.id,
                form_data: serde_json::json!({"amount": 250}),
                submitted_by: Some(MemberId::new()),
            },
        )
        .await
        .expect("submit succeeds");

        SubmittedRequest {
            id: request.id,
            steps: self.steps.clone(),
        }
    }
}
