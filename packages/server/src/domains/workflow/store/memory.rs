//! In-memory workflow store for tests and local runs.
//!
//! A unit of work holds the store mutex for its whole lifetime and mutates a
//! private copy of the state, which is swapped in on commit. Transactions are
//! therefore fully serialized and a dropped transaction changes nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{WorkflowStore, WorkflowTx};
use crate::common::{ApprovalId, RequestId, StepId, WorkflowId};
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::models::{
    validate_steps, ApprovalDecision, AuditEntry, NewAuditEntry, NewRequest, Request,
    RequestApproval, RequestStatus, WorkflowDefinition, WorkflowStep,
};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    workflows: HashMap<WorkflowId, WorkflowDefinition>,
    steps: HashMap<WorkflowId, Vec<WorkflowStep>>,
    requests: HashMap<RequestId, Request>,
    approvals: Vec<RequestApproval>,
    audit_log: Vec<AuditEntry>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_audit: AtomicBool,
    fail_next_commit: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryWorkflowStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_workflow(
        &self,
        definition: WorkflowDefinition,
        steps: Vec<WorkflowStep>,
    ) -> Result<Vec<WorkflowStep>, WorkflowError> {
        let steps = validate_steps(definition.id, steps)?;
        let mut state = self.state.lock().await;
        state.steps.insert(definition.id, steps.clone());
        state.workflows.insert(definition.id, definition);
        Ok(steps)
    }

    /// Write a request row as-is, bypassing the engine.
    pub async fn put_request(&self, request: Request) {
        self.state.lock().await.requests.insert(request.id, request);
    }

    /// Write an approval row as-is, bypassing the engine.
    pub async fn put_approval(&self, approval: RequestApproval) {
        let mut state = self.state.lock().await;
        state
            .approvals
            .retain(|a| !(a.request_id == approval.request_id && a.step_id == approval.step_id));
        state.approvals.push(approval);
    }

    pub async fn request(&self, id: RequestId) -> Option<Request> {
        self.state.lock().await.requests.get(&id).cloned()
    }

    pub async fn approvals(&self, request_id: RequestId) -> Vec<RequestApproval> {
        self.state
            .lock()
            .await
            .approvals
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect()
    }

    pub async fn audit_entries(&self, request_id: RequestId) -> Vec<AuditEntry> {
        self.state
            .lock()
            .await
            .audit_log
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Make every audit insert fail until switched off.
    pub fn fail_audit_inserts(&self, fail: bool) {
        self.faults.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Make the next commit fail, discarding that transaction's writes.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, WorkflowError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryWorkflowTx {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    async fn suspect_request_ids(&self, limit: i64) -> Result<Vec<RequestId>, WorkflowError> {
        let state = self.state.lock().await;
        let mut suspects: Vec<&Request> = state
            .requests
            .values()
            .filter(|r| {
                !r.status.is_terminal() || r.current_step_id.is_some() || r.workflow_id.is_none()
            })
            .collect();
        suspects.sort_by_key(|r| r.created_at);
        Ok(suspects
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|r| r.id)
            .collect())
    }

    async fn ping(&self) -> Result<(), WorkflowError> {
        Ok(())
    }
}

pub struct MemoryWorkflowTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<Faults>,
}

#[async_trait]
impl WorkflowTx for MemoryWorkflowTx {
    async fn find_request(&mut self, id: RequestId) -> Result<Option<Request>, WorkflowError> {
        Ok(self.working.requests.get(&id).cloned())
    }

    async fn lock_request(&mut self, id: RequestId) -> Result<Option<Request>, WorkflowError> {
        // The whole store is already held by this transaction
        self.find_request(id).await
    }

    async fn find_workflow(
        &mut self,
        id: WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, WorkflowError> {
        Ok(self.working.workflows.get(&id).cloned())
    }

    async fn workflow_steps(&mut self, id: WorkflowId) -> Result<Vec<WorkflowStep>, WorkflowError> {
        Ok(self.working.steps.get(&id).cloned().unwrap_or_default())
    }

    async fn find_approval(
        &mut self,
        request_id: RequestId,
        step_id: StepId,
    ) -> Result<Option<RequestApproval>, WorkflowError> {
        Ok(self
            .working
            .approvals
            .iter()
            .find(|a| a.request_id == request_id && a.step_id == step_id)
            .cloned())
    }

    async fn approvals_for_request(
        &mut self,
        request_id: RequestId,
    ) -> Result<Vec<RequestApproval>, WorkflowError> {
        let mut approvals: Vec<RequestApproval> = self
            .working
            .approvals
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect();
        approvals.sort_by_key(|a| a.created_at);
        Ok(approvals)
    }

    async fn record_decision(
        &mut self,
        decision: &ApprovalDecision,
    ) -> Result<RequestApproval, WorkflowError> {
        let existing = self
            .working
            .approvals
            .iter_mut()
            .find(|a| a.request_id == decision.request_id && a.step_id == decision.step_id);

        match existing {
            Some(approval) if approval.status.is_decided() => Ok(approval.clone()),
            Some(approval) => {
                approval.status = decision.action.decided_status();
                approval.comments = decision.comments.clone();
                approval.decided_at = Some(decision.decided_at);
                Ok(approval.clone())
            }
            None => {
                let approval = RequestApproval {
                    id: ApprovalId::new(),
                    request_id: decision.request_id,
                    step_id: decision.step_id,
                    approver_id: decision.approver_id,
                    status: decision.action.decided_status(),
                    comments: decision.comments.clone(),
                    created_at: Utc::now(),
                    decided_at: Some(decision.decided_at),
                };
                self.working.approvals.push(approval.clone());
                Ok(approval)
            }
        }
    }

    async fn insert_request(&mut self, new: &NewRequest) -> Result<Request, WorkflowError> {
        let now = Utc::now();
        let request = Request {
            id: RequestId::new(),
            workflow_id: Some(new.workflow_id),
            status: RequestStatus::Pending,
            current_step_id: new.current_step_id,
            form_data: new.form_data.clone(),
            submitted_by: new.submitted_by,
            created_at: now,
            updated_at: now,
        };
        self.working.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn update_request_state(
        &mut self,
        id: RequestId,
        status: RequestStatus,
        current_step_id: Option<StepId>,
    ) -> Result<Request, WorkflowError> {
        let request = self
            .working
            .requests
            .get_mut(&id)
            .ok_or_else(|| WorkflowError::not_found("request", id))?;
        request.status = status;
        request.current_step_id = current_step_id;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn insert_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry, WorkflowError> {
        if self.faults.fail_audit.load(Ordering::SeqCst) {
            return Err(WorkflowError::Persistence(
                "audit log unavailable".to_string(),
            ));
        }
        let entry = entry.into_entry();
        self.working.audit_log.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<(), WorkflowError> {
        let MemoryWorkflowTx {
            mut guard,
            working,
            faults,
        } = *self;

        if faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(WorkflowError::Persistence(
                "commit failed: injected fault".to_string(),
            ));
        }

        *guard = working;
        Ok(())
    }
}
