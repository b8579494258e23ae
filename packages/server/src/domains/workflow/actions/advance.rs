use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::transition::{apply_state_change, complete_request};
use crate::common::{MemberId, RequestId, StepId};
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::machines::{ApprovalMachine, Transition};
use crate::domains::workflow::models::{
    ApprovalAction, ApprovalDecision, AuditActor, Request, RequestStatus,
};
use crate::domains::workflow::store::WorkflowStore;

/// An approver's action on the step they believe is current.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceInput {
    pub request_id: RequestId,
    pub current_step_id: StepId,
    pub action: ApprovalAction,
    pub actor_id: MemberId,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResult {
    pub request_id: RequestId,
    pub previous_step_id: StepId,
    pub next_step_id: Option<StepId>,
    pub status: RequestStatus,
    pub is_terminal: bool,
}

impl TransitionResult {
    fn new(request_id: RequestId, previous_step_id: StepId, transition: Transition) -> Self {
        Self {
            request_id,
            previous_step_id,
            next_step_id: transition.next_step_id(),
            status: transition.status(),
            is_terminal: transition.is_terminal(),
        }
    }

    /// The request's stored state, for replays whose recorded outcome was
    /// never applied.
    fn from_stored(request: &Request, previous_step_id: StepId) -> Self {
        Self {
            request_id: request.id,
            previous_step_id,
            next_step_id: request.current_step_id,
            status: request.status,
            is_terminal: request.status.is_terminal(),
        }
    }
}

/// Apply an approve/reject action to a request's current step.
///
/// Runs as one unit of work: the request row is locked, the approval is
/// recorded, the request state and an audit entry are written, then
/// everything commits together. Re-submitting an action for a step that was
/// already decided replays the original outcome without writing anything,
/// so retries after a lost response are safe. If the request still sits on
/// the decided step, the stored state is reported instead.
pub async fn advance(
    store: &dyn WorkflowStore,
    input: AdvanceInput,
) -> Result<TransitionResult, WorkflowError> {
    let mut tx = store.begin().await?;

    let request = tx
        .lock_request(input.request_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("request", input.request_id))?;

    let workflow_id = request.workflow_id.ok_or_else(|| {
        WorkflowError::not_found("workflow", format!("none assigned to request {}", request.id))
    })?;

    let steps = tx.workflow_steps(workflow_id).await?;
    let machine = ApprovalMachine::new(&steps);
    let step = machine
        .step(input.current_step_id)
        .ok_or_else(|| WorkflowError::not_found("step", input.current_step_id))?;

    let existing = tx.find_approval(request.id, step.id).await?;

    let expected_approver = existing
        .as_ref()
        .map(|approval| approval.approver_id)
        .unwrap_or(step.approver_id);
    if input.actor_id != expected_approver {
        warn!(
            request_id = %request.id,
            step_id = %step.id,
            actor_id = %input.actor_id,
            "Rejected action from non-assigned approver"
        );
        return Err(WorkflowError::Forbidden {
            actor_id: input.actor_id,
            step_id: step.id,
        });
    }

    // Already decided: report the outcome of the original decision.
    if let Some(recorded) = existing
        .as_ref()
        .and_then(|approval| approval.status.decided_action())
    {
        // A request still parked on this step never absorbed the recorded
        // decision. Report what is stored and leave the divergence to repair.
        if !request.status.is_terminal() && request.current_step_id == Some(step.id) {
            warn!(
                request_id = %request.id,
                step_id = %step.id,
                recorded = %recorded,
                status = %request.status,
                "Recorded decision was never applied to the request"
            );
            return Ok(TransitionResult::from_stored(&request, step.id));
        }

        let transition = machine.decide(step, recorded);
        debug!(
            request_id = %request.id,
            step_id = %step.id,
            recorded = %recorded,
            submitted = %input.action,
            "Replaying already-decided approval"
        );
        return Ok(TransitionResult::new(request.id, step.id, transition));
    }

    if request.status.is_terminal() || request.current_step_id != Some(step.id) {
        debug!(
            request_id = %request.id,
            submitted = %step.id,
            current = ?request.current_step_id,
            "Stale step submission"
        );
        return Err(WorkflowError::StaleStep {
            request_id: request.id,
            submitted: step.id,
            current: request.current_step_id,
        });
    }

    let transition = machine.decide(step, input.action);

    tx.record_decision(&ApprovalDecision {
        request_id: request.id,
        step_id: step.id,
        approver_id: input.actor_id,
        action: input.action,
        comments: input.comments.clone(),
        decided_at: Utc::now(),
    })
    .await?;

    let actor = AuditActor::Approver(input.actor_id);
    let updated = match transition {
        Transition::Complete => {
            complete_request(tx.as_mut(), &request, actor, input.action.as_str()).await?
        }
        Transition::MoveTo(_) | Transition::Reject => {
            apply_state_change(
                tx.as_mut(),
                &request,
                transition.status(),
                transition.next_step_id(),
                actor,
                input.action.as_str(),
            )
            .await?
        }
    };

    tx.commit().await?;

    info!(
        request_id = %updated.id,
        from_step = %step.id,
        to_step = ?updated.current_step_id,
        status = %updated.status,
        actor_id = %input.actor_id,
        action = %input.action,
        "Workflow request advanced"
    );

    Ok(TransitionResult::new(request.id, step.id, transition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ApprovalId;
    use crate::domains::workflow::actions::testing::{Fixture, SubmittedRequest};
    use crate::domains::workflow::models::{
        ApprovalStatus, AuditActorKind, RequestApproval, StepType,
    };

    fn act(
        request: &SubmittedRequest,
        step_index: usize,
        action: ApprovalAction,
    ) -> AdvanceInput {
        AdvanceInput {
            request_id: request.id,
            current_step_id: request.steps[step_index].id,
            action,
            actor_id: request.steps[step_index].approver_id,
            comments: None,
        }
    }

    #[tokio::test]
    async fn scenario_a_runs_decision_opinion_decision_to_completion() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        let first = advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap();
        assert_eq!(first.next_step_id, Some(request.steps[1].id));
        assert_eq!(first.status, RequestStatus::InProgress);
        assert!(!first.is_terminal);

        let second = advance(&fixture.store, act(&request, 1, ApprovalAction::Reject))
            .await
            .unwrap();
        assert_eq!(second.next_step_id, Some(request.steps[2].id));
        assert_eq!(second.status, RequestStatus::InProgress);

        let third = advance(&fixture.store, act(&request, 2, ApprovalAction::Approve))
            .await
            .unwrap();
        assert_eq!(third.next_step_id, None);
        assert_eq!(third.status, RequestStatus::Completed);
        assert!(third.is_terminal);

        let stored = fixture.store.request(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert_eq!(stored.current_step_id, None);
        assert_eq!(fixture.store.audit_entries(request.id).await.len(), 3);
    }

    #[tokio::test]
    async fn scenario_b_rejected_decision_halts_immediately() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        let result = advance(&fixture.store, act(&request, 0, ApprovalAction::Reject))
            .await
            .unwrap();
        assert_eq!(result.status, RequestStatus::Rejected);
        assert_eq!(result.next_step_id, None);
        assert!(result.is_terminal);

        let stored = fixture.store.request(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Rejected);
        assert_eq!(stored.current_step_id, None);

        let approvals = fixture.store.approvals(request.id).await;
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].step_id, request.steps[0].id);
        assert_eq!(approvals[0].status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn duplicate_submission_replays_without_second_write() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        let first = advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap();
        let again = advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(fixture.store.audit_entries(request.id).await.len(), 1);
        assert_eq!(fixture.store.approvals(request.id).await.len(), 1);
        let stored = fixture.store.request(request.id).await.unwrap();
        assert_eq!(stored.current_step_id, Some(request.steps[1].id));
    }

    #[tokio::test]
    async fn conflicting_resubmission_keeps_the_recorded_decision() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap();
        let replay = advance(&fixture.store, act(&request, 0, ApprovalAction::Reject))
            .await
            .unwrap();

        assert_eq!(replay.status, RequestStatus::InProgress);
        let approvals = fixture.store.approvals(request.id).await;
        assert_eq!(approvals[0].status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn replay_on_a_stuck_request_reports_stored_state() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;
        let mut stuck = fixture.store.request(request.id).await.unwrap();
        stuck.status = RequestStatus::InProgress;
        stuck.current_step_id = Some(request.steps[2].id);
        fixture.store.put_request(stuck.clone()).await;
        for index in [0, 2] {
            let step = &request.steps[index];
            fixture
                .store
                .put_approval(RequestApproval {
                    id: ApprovalId::new(),
                    request_id: request.id,
                    step_id: step.id,
                    approver_id: step.approver_id,
                    status: ApprovalStatus::Approved,
                    comments: None,
                    created_at: Utc::now(),
                    decided_at: Some(Utc::now()),
                })
                .await;
        }

        let result = advance(&fixture.store, act(&request, 2, ApprovalAction::Approve))
            .await
            .unwrap();

        assert_eq!(result.status, RequestStatus::InProgress);
        assert_eq!(result.next_step_id, Some(request.steps[2].id));
        assert!(!result.is_terminal);
        assert_eq!(fixture.store.request(request.id).await.unwrap(), stuck);
        assert!(fixture.store.audit_entries(request.id).await.is_empty());
    }

    #[tokio::test]
    async fn acting_on_a_step_that_is_not_current_is_stale() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        let err = advance(&fixture.store, act(&request, 2, ApprovalAction::Approve))
            .await
            .unwrap_err();

        match err {
            WorkflowError::StaleStep {
                submitted, current, ..
            } => {
                assert_eq!(submitted, request.steps[2].id);
                assert_eq!(current, Some(request.steps[0].id));
            }
            other => panic!("expected StaleStep, got {other:?}"),
        }
        assert!(fixture.store.approvals(request.id).await.is_empty());
    }

    #[tokio::test]
    async fn acting_after_rejection_is_stale() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;
        advance(&fixture.store, act(&request, 0, ApprovalAction::Reject))
            .await
            .unwrap();

        let err = advance(&fixture.store, act(&request, 1, ApprovalAction::Approve))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::StaleStep { current: None, .. }));
    }

    #[tokio::test]
    async fn wrong_actor_is_forbidden() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        let mut input = act(&request, 0, ApprovalAction::Approve);
        input.actor_id = MemberId::new();

        let err = advance(&fixture.store, input).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden { .. }));
        let stored = fixture.store.request(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        let mut input = act(&request, 0, ApprovalAction::Approve);
        input.request_id = RequestId::new();
        assert!(matches!(
            advance(&fixture.store, input).await.unwrap_err(),
            WorkflowError::NotFound { entity: "request", .. }
        ));

        let mut input = act(&request, 0, ApprovalAction::Approve);
        input.current_step_id = StepId::new();
        assert!(matches!(
            advance(&fixture.store, input).await.unwrap_err(),
            WorkflowError::NotFound { entity: "step", .. }
        ));
    }

    #[tokio::test]
    async fn failed_audit_does_not_fail_the_transition() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;
        fixture.store.fail_audit_inserts(true);

        let result = advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap();

        assert_eq!(result.next_step_id, Some(request.steps[1].id));
        let stored = fixture.store.request(request.id).await.unwrap();
        assert_eq!(stored.current_step_id, Some(request.steps[1].id));
        assert!(fixture.store.audit_entries(request.id).await.is_empty());
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing_and_retry_succeeds() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;
        fixture.store.fail_next_commit();

        let err = advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(fixture.store.approvals(request.id).await.is_empty());
        let stored = fixture.store.request(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);

        let retried = advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap();
        assert_eq!(retried.next_step_id, Some(request.steps[1].id));
    }

    #[tokio::test]
    async fn concurrent_actions_on_the_same_step_advance_once() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        let (left, right) = tokio::join!(
            advance(&fixture.store, act(&request, 0, ApprovalAction::Approve)),
            advance(&fixture.store, act(&request, 0, ApprovalAction::Approve)),
        );

        assert_eq!(left.unwrap(), right.unwrap());
        let audit = fixture.store.audit_entries(request.id).await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].actor_kind, AuditActorKind::Approver);
    }

    #[tokio::test]
    async fn audit_entry_captures_before_and_after() {
        let fixture = Fixture::decision_opinion_decision().await;
        let request = fixture.submit().await;

        advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap();

        let audit = fixture.store.audit_entries(request.id).await;
        let entry = &audit[0];
        assert_eq!(entry.action, "approve");
        assert_eq!(entry.actor_id, Some(request.steps[0].approver_id));
        assert_eq!(entry.previous_status, RequestStatus::Pending);
        assert_eq!(entry.previous_step_id, Some(request.steps[0].id));
        assert_eq!(entry.new_status, RequestStatus::InProgress);
        assert_eq!(entry.new_step_id, Some(request.steps[1].id));
    }

    #[tokio::test]
    async fn optional_opinion_is_bypassed_from_a_decision() {
        let fixture = Fixture::with_steps(&[
            (StepType::Decision, true),
            (StepType::Opinion, false),
            (StepType::Decision, true),
        ])
        .await;
        let request = fixture.submit().await;

        let result = advance(&fixture.store, act(&request, 0, ApprovalAction::Approve))
            .await
            .unwrap();
        assert_eq!(result.next_step_id, Some(request.steps[2].id));
    }
}
