use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::RequestId;
use crate::domains::workflow::actions::diagnose::inspect;
use crate::domains::workflow::actions::transition::complete_request;
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::models::{AuditActor, RequestStatus};
use crate::domains::workflow::store::WorkflowStore;

pub const REPAIR_ACTION: &str = "repair";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_issue: Option<String>,
}

impl RepairResult {
    fn noop(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            fixed_issue: None,
        }
    }
}

/// Finalize a request whose approvals say it is done but whose stored state
/// disagrees.
///
/// The divergence is re-checked under the request lock, so a report computed
/// earlier is never trusted. Calling this on a completed request is a no-op
/// success. Anything other than a missed completion is returned as
/// [`WorkflowError::UnfixableDivergence`].
pub async fn repair(
    store: &dyn WorkflowStore,
    request_id: RequestId,
) -> Result<RepairResult, WorkflowError> {
    let mut tx = store.begin().await?;

    let request = tx
        .lock_request(request_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("request", request_id))?;

    if request.status == RequestStatus::Completed {
        debug!(request_id = %request_id, "Repair skipped; request already completed");
        return Ok(RepairResult::noop("request is already completed"));
    }

    let report = inspect(tx.as_mut(), &request).await?;

    let Some(issue) = report.repair_target().map(ToString::to_string) else {
        if report.issues.is_empty() {
            return Ok(RepairResult {
                success: false,
                message: "no divergence detected; nothing to repair".to_string(),
                fixed_issue: None,
            });
        }
        warn!(
            request_id = %request_id,
            issues = ?report.issue_messages(),
            "Divergence needs manual correction"
        );
        return Err(WorkflowError::UnfixableDivergence {
            request_id,
            issues: report.issue_messages(),
        });
    };

    complete_request(tx.as_mut(), &request, AuditActor::SystemRepair, REPAIR_ACTION).await?;
    tx.commit().await?;

    info!(
        request_id = %request_id,
        previous_status = %request.status,
        previous_step = ?request.current_step_id,
        fixed_issue = %issue,
        "Workflow request repaired"
    );

    Ok(RepairResult {
        success: true,
        message: "request marked as completed".to_string(),
        fixed_issue: Some(issue),
    })
}
