use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::common::RequestId;
use crate::domains::workflow::actions::{
    advance, diagnose, repair, submit, AdvanceInput, DiagnosticReport, RepairResult, SubmitInput,
    TransitionResult,
};
use crate::domains::workflow::error::WorkflowError;
use crate::domains::workflow::models::Request;
use crate::server::app::AppState;
use crate::server::error::{json_body, status_for};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRef {
    pub request_id: RequestId,
}

pub async fn submit_handler(
    Extension(state): Extension<AppState>,
    payload: Result<Json<SubmitInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Request>), WorkflowError> {
    let input = json_body(payload)?;
    let request = submit(state.store.as_ref(), input).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn advance_handler(
    Extension(state): Extension<AppState>,
    payload: Result<Json<AdvanceInput>, JsonRejection>,
) -> Result<Json<TransitionResult>, WorkflowError> {
    let input = json_body(payload)?;
    let result = advance(state.store.as_ref(), input).await?;
    Ok(Json(result))
}

pub async fn diagnose_handler(
    Extension(state): Extension<AppState>,
    payload: Result<Json<RequestRef>, JsonRejection>,
) -> Result<Json<DiagnosticReport>, WorkflowError> {
    let RequestRef { request_id } = json_body(payload)?;
    let report = diagnose(state.store.as_ref(), request_id).await?;
    Ok(Json(report))
}

/// Unfixable divergences answer 422 with a `RepairResult` body so callers
/// always get the same shape back from this route.
pub async fn repair_handler(
    Extension(state): Extension<AppState>,
    payload: Result<Json<RequestRef>, JsonRejection>,
) -> Response {
    let request_id = match json_body(payload) {
        Ok(RequestRef { request_id }) => request_id,
        Err(err) => return err.into_response(),
    };

    match repair(state.store.as_ref(), request_id).await {
        Ok(result) => Json(result).into_response(),
        Err(err @ WorkflowError::UnfixableDivergence { .. }) => (
            status_for(&err),
            Json(RepairResult {
                success: false,
                message: err.to_string(),
                fixed_issue: None,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
