use tracing::warn;

use crate::common::StepId;
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::models::{AuditActor, NewAuditEntry, Request, RequestStatus};
use crate::domains::workflow::store::WorkflowTx;

/// Write a request's new workflow state and its audit entry.
///
/// The only place request state is mutated. Must run inside the caller's
/// unit of work; nothing is visible until the caller commits. Audit failures
/// are logged and swallowed.
pub(crate) async fn apply_state_change(
    tx: &mut dyn WorkflowTx,
    request: &Request,
    status: RequestStatus,
    current_step_id: Option<StepId>,
    actor: AuditActor,
    action: &str,
) -> Result<Request, WorkflowError> {
    let updated = tx
        .update_request_state(request.id, status, current_step_id)
        .await?;

    let entry = NewAuditEntry {
        request_id: request.id,
        actor,
        action: action.to_string(),
        previous_status: request.status,
        previous_step_id: request.current_step_id,
        new_status: updated.status,
        new_step_id: updated.current_step_id,
    };

    if let Err(err) = tx.insert_audit(entry).await {
        warn!(
            request_id = %request.id,
            action,
            error = %err,
            "Failed to write workflow audit entry; transition kept"
        );
    }

    Ok(updated)
}

/// Finalize a request as completed. Shared by end-of-chain transitions and
/// the repair executor.
pub(crate) async fn complete_request(
    tx: &mut dyn WorkflowTx,
    request: &Request,
    actor: AuditActor,
    action: &str,
) -> Result<Request, WorkflowError> {
    apply_state_change(tx, request, RequestStatus::Completed, None, actor, action).await
}
