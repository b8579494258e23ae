use thiserror::Error;

use crate::common::{MemberId, RequestId, StepId};

/// Errors surfaced by the workflow engine, diagnostics and repair.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("stale step {submitted} for request {request_id}: current step is {}", display_step(.current))]
    StaleStep {
        request_id: RequestId,
        submitted: StepId,
        current: Option<StepId>,
    },

    #[error("member {actor_id} is not the assigned approver for step {step_id}")]
    Forbidden { actor_id: MemberId, step_id: StepId },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("request {request_id} has no deterministic repair: {}", .issues.join("; "))]
    UnfixableDivergence {
        request_id: RequestId,
        issues: Vec<String>,
    },
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        WorkflowError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Only storage failures are worth retrying; every other variant
    /// reflects state or input that a retry would not change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Persistence(_))
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => WorkflowError::not_found("row", "query returned no rows"),
            other => WorkflowError::Persistence(other.to_string()),
        }
    }
}

fn display_step(step: &Option<StepId>) -> String {
    match step {
        Some(id) => id.to_string(),
        None => "none (request is terminal)".to_string(),
    }
}
