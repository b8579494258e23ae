use crate::common::StepId;
use crate::domains::workflow::models::{
    ApprovalAction, RequestStatus, StepType, WorkflowStep,
};

/// Where a request goes after an action on its current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Hand the request to the next step.
    MoveTo(StepId),
    /// End of chain reached with nothing blocking.
    Complete,
    /// A decision step was rejected. Remaining steps are never reached.
    Reject,
}

impl Transition {
    pub fn status(self) -> RequestStatus {
        match self {
            Transition::MoveTo(_) => RequestStatus::InProgress,
            Transition::Complete => RequestStatus::Completed,
            Transition::Reject => RequestStatus::Rejected,
        }
    }

    pub fn next_step_id(self) -> Option<StepId> {
        match self {
            Transition::MoveTo(step_id) => Some(step_id),
            Transition::Complete | Transition::Reject => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.status().is_terminal()
    }
}

/// Approval Machine - pure progression rules over one workflow's steps.
///
/// Rules:
/// 1. A step's type decides whether the action advances (see [`StepType::advances`]).
///    A decision step that does not advance rejects the whole request.
/// 2. From a decision step the next target is the next step in order,
///    bypassing optional opinion steps. Required opinion steps and
///    notification steps are still visited.
/// 3. From an opinion or notification step the next target is simply the
///    next step in order.
/// 4. No next step means the request is complete.
///
/// The machine never touches storage; the same rules drive both live
/// transitions and diagnostic replay.
pub struct ApprovalMachine<'a> {
    steps: &'a [WorkflowStep],
}

impl<'a> ApprovalMachine<'a> {
    pub fn new(steps: &'a [WorkflowStep]) -> Self {
        Self { steps }
    }

    pub fn step(&self, step_id: StepId) -> Option<&'a WorkflowStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// Where a freshly submitted request starts.
    pub fn first_step(&self) -> Option<&'a WorkflowStep> {
        self.steps.iter().min_by_key(|step| step.order)
    }

    pub fn next_after(&self, current: &WorkflowStep) -> Option<&'a WorkflowStep> {
        let from_decision = current.step_type == StepType::Decision;
        self.steps
            .iter()
            .filter(|step| step.order > current.order)
            .filter(|step| !(from_decision && bypassed_after_decision(step)))
            .min_by_key(|step| step.order)
    }

    pub fn decide(&self, current: &WorkflowStep, action: ApprovalAction) -> Transition {
        if !current.step_type.advances(action) {
            return Transition::Reject;
        }

        match self.next_after(current) {
            Some(next) => Transition::MoveTo(next.id),
            None => Transition::Complete,
        }
    }
}

fn bypassed_after_decision(step: &WorkflowStep) -> bool {
    step.step_type == StepType::Opinion && !step.is_required
}
