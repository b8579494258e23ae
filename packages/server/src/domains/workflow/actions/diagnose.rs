use std::collections::HashSet;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::common::{RequestId, StepId, WorkflowId};
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::machines::ApprovalMachine;
use crate::domains::workflow::models::{
    ApprovalStatus, Request, RequestApproval, RequestStatus, WorkflowStep,
};
use crate::domains::workflow::store::{WorkflowStore, WorkflowTx};

/// A mismatch between stored request state and what its history implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticIssue {
    CompletedWithCurrentStep { step_id: StepId },
    RejectedWithCurrentStep { step_id: StepId },
    PendingWithApprovals { count: usize },
    MissingWorkflow,
    CurrentStepOutsideWorkflow { step_id: StepId },
    /// Every required decision is approved but the request was never finalized.
    ShouldBeCompleted { status: RequestStatus },
    InProgressButComplete,
}

impl DiagnosticIssue {
    /// Issues about the shape of the data itself. Their presence rules out
    /// any automatic repair.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DiagnosticIssue::CompletedWithCurrentStep { .. }
                | DiagnosticIssue::RejectedWithCurrentStep { .. }
                | DiagnosticIssue::MissingWorkflow
                | DiagnosticIssue::CurrentStepOutsideWorkflow { .. }
        )
    }
}

impl fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticIssue::CompletedWithCurrentStep { step_id } => write!(
                f,
                "status is completed but current step {} is still set",
                step_id
            ),
            DiagnosticIssue::RejectedWithCurrentStep { step_id } => write!(
                f,
                "status is rejected but current step {} is still set",
                step_id
            ),
            DiagnosticIssue::PendingWithApprovals { count } => write!(
                f,
                "status is pending but {} approval(s) are recorded",
                count
            ),
            DiagnosticIssue::MissingWorkflow => {
                write!(f, "request has no workflow and cannot be processed")
            }
            DiagnosticIssue::CurrentStepOutsideWorkflow { step_id } => write!(
                f,
                "current step {} does not belong to the request's workflow",
                step_id
            ),
            DiagnosticIssue::ShouldBeCompleted { status } => write!(
                f,
                "all required decision steps are approved; request should be completed but is {}",
                status
            ),
            DiagnosticIssue::InProgressButComplete => write!(
                f,
                "status is in_progress but no required decision step remains"
            ),
        }
    }
}

impl Serialize for DiagnosticIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// State recomputed from workflow definition and approval history,
/// side by side with what is stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub workflow_id: Option<WorkflowId>,
    pub current_step_id: Option<StepId>,
    pub total_required_decision_steps: usize,
    /// Distinct decision steps with an approved row, optional ones included.
    pub completed_decision_steps: usize,
    /// The subset of `completed_decision_steps` that completion is judged on.
    pub completed_required_decision_steps: usize,
    pub is_complete: bool,
    pub next_expected_step_id: Option<StepId>,
    pub approval_count: usize,
    pub issues: Vec<DiagnosticIssue>,
    pub can_fix: bool,
}

impl DiagnosticReport {
    /// The issue a repair would resolve, if the report admits one.
    pub fn repair_target(&self) -> Option<&DiagnosticIssue> {
        if !self.can_fix {
            return None;
        }
        self.issues
            .iter()
            .find(|issue| matches!(issue, DiagnosticIssue::ShouldBeCompleted { .. }))
    }

    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

/// Replay a request against its workflow. Pure; `steps` is `None` when the
/// request has no (resolvable) workflow.
pub fn analyze(
    request: &Request,
    steps: Option<&[WorkflowStep]>,
    approvals: &[RequestApproval],
) -> DiagnosticReport {
    let mut issues = Vec::new();

    let decision_steps: HashSet<StepId> = steps
        .unwrap_or_default()
        .iter()
        .filter(|step| step.step_type.is_gating())
        .map(|step| step.id)
        .collect();
    let required_decisions: HashSet<StepId> = steps
        .unwrap_or_default()
        .iter()
        .filter(|step| step.step_type.is_gating() && step.is_required)
        .map(|step| step.id)
        .collect();

    let approved_decisions: HashSet<StepId> = approvals
        .iter()
        .filter(|approval| approval.status == ApprovalStatus::Approved)
        .filter(|approval| decision_steps.contains(&approval.step_id))
        .map(|approval| approval.step_id)
        .collect();

    let total_required_decision_steps = required_decisions.len();
    let completed_decision_steps = approved_decisions.len();
    // An approved optional decision never stands in for a required one
    let completed_required_decision_steps =
        approved_decisions.intersection(&required_decisions).count();
    // Without a workflow there is nothing to be complete against
    let is_complete = steps.is_some()
        && completed_required_decision_steps >= total_required_decision_steps;

    let machine = steps.map(ApprovalMachine::new);
    let current_step = match (&machine, request.current_step_id) {
        (Some(machine), Some(step_id)) => machine.step(step_id),
        _ => None,
    };
    let next_expected_step_id = match (&machine, current_step) {
        (Some(machine), Some(step)) => machine.next_after(step).map(|next| next.id),
        _ => None,
    };

    if request.workflow_id.is_none() || steps.is_none() {
        issues.push(DiagnosticIssue::MissingWorkflow);
    }

    if let Some(step_id) = request.current_step_id {
        match request.status {
            RequestStatus::Completed => {
                issues.push(DiagnosticIssue::CompletedWithCurrentStep { step_id })
            }
            RequestStatus::Rejected => {
                issues.push(DiagnosticIssue::RejectedWithCurrentStep { step_id })
            }
            _ => {}
        }
        if steps.is_some() && current_step.is_none() {
            issues.push(DiagnosticIssue::CurrentStepOutsideWorkflow { step_id });
        }
    }

    if request.status == RequestStatus::Pending && !approvals.is_empty() {
        issues.push(DiagnosticIssue::PendingWithApprovals {
            count: approvals.len(),
        });
    }

    // A rejected decision is a legitimate halt even if every required
    // decision before it was approved.
    let halted_by_rejection = request.status == RequestStatus::Rejected
        && approvals.iter().any(|approval| {
            approval.status == ApprovalStatus::Rejected
                && decision_steps.contains(&approval.step_id)
        });

    if is_complete && request.status != RequestStatus::Completed && !halted_by_rejection {
        issues.push(DiagnosticIssue::ShouldBeCompleted {
            status: request.status,
        });
    }

    if is_complete && request.status == RequestStatus::InProgress {
        issues.push(DiagnosticIssue::InProgressButComplete);
    }

    let can_fix = !request.status.is_terminal()
        && issues
            .iter()
            .any(|issue| matches!(issue, DiagnosticIssue::ShouldBeCompleted { .. }))
        && !issues.iter().any(DiagnosticIssue::is_structural);

    DiagnosticReport {
        request_id: request.id,
        status: request.status,
        workflow_id: request.workflow_id,
        current_step_id: request.current_step_id,
        total_required_decision_steps,
        completed_decision_steps,
        completed_required_decision_steps,
        is_complete,
        next_expected_step_id,
        approval_count: approvals.len(),
        issues,
        can_fix,
    }
}

/// Load everything `analyze` needs inside an open unit of work.
pub(crate) async fn inspect(
    tx: &mut dyn WorkflowTx,
    request: &Request,
) -> Result<DiagnosticReport, WorkflowError> {
    let steps = match request.workflow_id {
        Some(workflow_id) => match tx.find_workflow(workflow_id).await? {
            Some(_) => Some(tx.workflow_steps(workflow_id).await?),
            None => None,
        },
        None => None,
    };
    let approvals = tx.approvals_for_request(request.id).await?;

    Ok(analyze(request, steps.as_deref(), &approvals))
}

/// Audit one request. Read-only: never mutates state.
pub async fn diagnose(
    store: &dyn WorkflowStore,
    request_id: RequestId,
) -> Result<DiagnosticReport, WorkflowError> {
    let mut tx = store.begin().await?;
    let request = tx
        .find_request(request_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("request", request_id))?;

    let report = inspect(tx.as_mut(), &request).await?;

    if report.issues.is_empty() {
        debug!(request_id = %request_id, "No workflow divergence found");
    } else {
        warn!(
            request_id = %request_id,
            issues = ?report.issue_messages(),
            can_fix = report.can_fix,
            "Workflow divergence detected"
        );
    }

    Ok(report)
}

/// Diagnose every request that could be divergent and return the ones that are.
pub async fn scan_stuck(
    store: &dyn WorkflowStore,
    limit: i64,
) -> Result<Vec<DiagnosticReport>, WorkflowError> {
    if limit < 1 {
        return Err(WorkflowError::InvalidInput(format!(
            "scan limit must be at least 1, got {limit}"
        )));
    }
    let ids = store.suspect_request_ids(limit).await?;
    let mut reports = Vec::new();
    for id in ids {
        let report = diagnose(store, id).await?;
        if !report.issues.is_empty() {
            reports.push(report);
        }
    }
    Ok(reports)
}
