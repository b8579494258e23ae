use serde::Deserialize;
use tracing::info;

use crate::common::{MemberId, WorkflowId};
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::machines::ApprovalMachine;
use crate::domains::workflow::models::{NewRequest, Request};
use crate::domains::workflow::store::WorkflowStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitInput {
    pub workflow_id: WorkflowId,
    /// Opaque business payload, stored and returned verbatim.
    #[serde(default = "empty_form")]
    pub form_data: serde_json::Value,
    #[serde(default)]
    pub submitted_by: Option<MemberId>,
}

fn empty_form() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Create a request at the first step of its workflow.
///
/// A workflow without steps yields a pending request with no current step;
/// diagnostics report it as complete and repair finalizes it.
pub async fn submit(store: &dyn WorkflowStore, input: SubmitInput) -> Result<Request, WorkflowError> {
    let mut tx = store.begin().await?;

    tx.find_workflow(input.workflow_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("workflow", input.workflow_id))?;

    let steps = tx.workflow_steps(input.workflow_id).await?;
    let first_step = ApprovalMachine::new(&steps).first_step().map(|step| step.id);

    let request = tx
        .insert_request(&NewRequest {
            workflow_id: input.workflow_id,
            current_step_id: first_step,
            form_data: input.form_data,
            submitted_by: input.submitted_by,
        })
        .await?;

    tx.commit().await?;

    info!(
        request_id = %request.id,
        workflow_id = %input.workflow_id,
        first_step = ?first_step,
        "Workflow request submitted"
    );

    Ok(request)
}
