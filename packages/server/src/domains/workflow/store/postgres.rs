use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Connection, PgPool, Postgres, Transaction};
use tracing::debug;

use super::{PoolMetrics, WorkflowStore, WorkflowTx};
use crate::common::{RequestId, StepId, WorkflowId};
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::models::{
    ApprovalDecision, AuditEntry, NewAuditEntry, NewRequest, Request, RequestApproval,
    RequestStatus, WorkflowDefinition, WorkflowStep,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL-backed workflow store.
///
/// Each unit of work is a database transaction with a bounded
/// `lock_timeout`, so a transition stuck behind another one on the same
/// request fails as a retryable persistence error instead of hanging.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL does not accept bind parameters; the value is an integer.
        // Zero would disable the timeout, so it is clamped to 1ms.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis().max(1)
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgWorkflowTx { tx }))
    }

    async fn suspect_request_ids(&self, limit: i64) -> Result<Vec<RequestId>, WorkflowError> {
        let mut conn = self.pool.acquire().await?;
        Request::find_suspect_ids(limit, &mut conn).await
    }

    async fn ping(&self) -> Result<(), WorkflowError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn pool_metrics(&self) -> Option<PoolMetrics> {
        Some(PoolMetrics {
            size: self.pool.size(),
            idle_connections: self.pool.num_idle(),
            max_connections: self.pool.options().get_max_connections(),
        })
    }
}

pub struct PgWorkflowTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl WorkflowTx for PgWorkflowTx {
    async fn find_request(&mut self, id: RequestId) -> Result<Option<Request>, WorkflowError> {
        Request::find_by_id(id, &mut self.tx).await
    }

    async fn lock_request(&mut self, id: RequestId) -> Result<Option<Request>, WorkflowError> {
        Request::find_by_id_for_update(id, &mut self.tx).await
    }

    async fn find_workflow(
        &mut self,
        id: WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, WorkflowError> {
        WorkflowDefinition::find_by_id(id, &mut self.tx).await
    }

    async fn workflow_steps(&mut self, id: WorkflowId) -> Result<Vec<WorkflowStep>, WorkflowError> {
        WorkflowStep::find_by_workflow(id, &mut self.tx).await
    }

    async fn find_approval(
        &mut self,
        request_id: RequestId,
        step_id: StepId,
    ) -> Result<Option<RequestApproval>, WorkflowError> {
        RequestApproval::find_for_step(request_id, step_id, &mut self.tx).await
    }

    async fn approvals_for_request(
        &mut self,
        request_id: RequestId,
    ) -> Result<Vec<RequestApproval>, WorkflowError> {
        RequestApproval::find_by_request(request_id, &mut self.tx).await
    }

    async fn record_decision(
        &mut self,
        decision: &ApprovalDecision,
    ) -> Result<RequestApproval, WorkflowError> {
        RequestApproval::record_decision(decision, &mut self.tx).await
    }

    async fn insert_request(&mut self, new: &NewRequest) -> Result<Request, WorkflowError> {
        Request::create(new, &mut self.tx).await
    }

    async fn update_request_state(
        &mut self,
        id: RequestId,
        status: RequestStatus,
        current_step_id: Option<StepId>,
    ) -> Result<Request, WorkflowError> {
        Request::update_state(id, status, current_step_id, &mut self.tx).await
    }

    async fn insert_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry, WorkflowError> {
        // Savepoint: a failed insert rolls back to here instead of aborting
        // the request/approval writes that precede it.
        let mut savepoint = Connection::begin(&mut *self.tx).await?;
        match entry.into_entry().insert(&mut savepoint).await {
            Ok(inserted) => {
                savepoint.commit().await?;
                Ok(inserted)
            }
            Err(err) => {
                if let Err(rollback_err) = savepoint.rollback().await {
                    debug!(error = %rollback_err, "audit savepoint rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), WorkflowError> {
        let PgWorkflowTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
