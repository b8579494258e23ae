//! Data-access contracts for the workflow engine.
//!
//! Every engine operation runs inside one [`WorkflowTx`]. A transaction that
//! is dropped without [`WorkflowTx::commit`] leaves no trace, which is what
//! makes transitions all-or-nothing.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;

use crate::common::{RequestId, StepId, WorkflowId};
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::models::{
    ApprovalDecision, AuditEntry, NewAuditEntry, NewRequest, Request, RequestApproval,
    RequestStatus, WorkflowDefinition, WorkflowStep,
};

pub use memory::MemoryWorkflowStore;
pub use postgres::PgWorkflowStore;

/// Connection pool metrics reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub size: u32,
    pub idle_connections: usize,
    pub max_connections: u32,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, WorkflowError>;

    /// Requests that may hold divergent state, oldest first.
    async fn suspect_request_ids(&self, limit: i64) -> Result<Vec<RequestId>, WorkflowError>;

    /// Cheap round-trip to the backing store.
    async fn ping(&self) -> Result<(), WorkflowError>;

    fn pool_metrics(&self) -> Option<PoolMetrics> {
        None
    }
}

/// One atomic unit of work against the request, approval and audit stores.
#[async_trait]
pub trait WorkflowTx: Send {
    async fn find_request(&mut self, id: RequestId) -> Result<Option<Request>, WorkflowError>;

    /// Like [`find_request`](Self::find_request) but holds the request
    /// exclusively until commit or drop.
    async fn lock_request(&mut self, id: RequestId) -> Result<Option<Request>, WorkflowError>;

    async fn find_workflow(
        &mut self,
        id: WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, WorkflowError>;

    /// Steps of a workflow ordered by `order`.
    async fn workflow_steps(&mut self, id: WorkflowId) -> Result<Vec<WorkflowStep>, WorkflowError>;

    async fn find_approval(
        &mut self,
        request_id: RequestId,
        step_id: StepId,
    ) -> Result<Option<RequestApproval>, WorkflowError>;

    /// Approval history ordered by creation.
    async fn approvals_for_request(
        &mut self,
        request_id: RequestId,
    ) -> Result<Vec<RequestApproval>, WorkflowError>;

    /// Create the approval row if absent and decide it if still pending.
    /// An already-decided row is returned unchanged.
    async fn record_decision(
        &mut self,
        decision: &ApprovalDecision,
    ) -> Result<RequestApproval, WorkflowError>;

    async fn insert_request(&mut self, new: &NewRequest) -> Result<Request, WorkflowError>;

    async fn update_request_state(
        &mut self,
        id: RequestId,
        status: RequestStatus,
        current_step_id: Option<StepId>,
    ) -> Result<Request, WorkflowError>;

    /// Append an audit entry. A failure here must not poison the
    /// surrounding transaction.
    async fn insert_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry, WorkflowError>;

    async fn commit(self: Box<Self>) -> Result<(), WorkflowError>;
}
