//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domains::workflow::store::WorkflowStore;
use crate::server::routes::{
    advance_handler, diagnose_handler, health_handler, repair_handler, submit_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WorkflowStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }
}

/// Build the Axum application router
///
/// An empty `allowed_origins` list allows any origin.
pub fn build_app(store: Arc<dyn WorkflowStore>, allowed_origins: &[String]) -> Router {
    let app_state = AppState::new(store);

    let cors = CorsLayer::new()
        .allow_origin(cors_origins(allowed_origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/workflow/submit", post(submit_handler))
        .route("/workflow/advance", post(advance_handler))
        .route("/workflow/diagnose", post(diagnose_handler))
        .route("/workflow/repair", post(repair_handler))
        .route("/health", get(health_handler))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_origins(allowed_origins: &[String]) -> AllowOrigin {
    if allowed_origins.is_empty() {
        return AllowOrigin::from(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    AllowOrigin::list(origins)
}
