use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::domains::workflow::error::WorkflowError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub retryable: bool,
}

pub fn status_for(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::InvalidInput(_) | WorkflowError::NotFound { .. } => StatusCode::BAD_REQUEST,
        WorkflowError::Forbidden { .. } => StatusCode::FORBIDDEN,
        WorkflowError::StaleStep { .. } => StatusCode::CONFLICT,
        WorkflowError::UnfixableDivergence { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, "Workflow request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            retryable: self.is_retryable(),
        };

        (status, Json(body)).into_response()
    }
}

/// Unwrap a JSON body, reporting malformed input as a 400 rather than
/// axum's default 422.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, WorkflowError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| WorkflowError::InvalidInput(rejection.body_text()))
}
