// File: fleet-server/src/errors.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("authentication failed")]
    Auth,
    #[error("contract violation: {0}")]
    ContractViolation(String),
    #[error("overloaded")]
    Overloaded,
    #[error("command queue full")]
    QueueFull,
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(rename = "ref")]
    reference: String,
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let reference = Uuid::new_v4().to_string();
        let (status, code, message) = match &self {
            FleetError::Auth => (StatusCode::UNAUTHORIZED, "auth_failed", "invalid credentials".to_string()),
            FleetError::ContractViolation(msg) => (StatusCode::BAD_REQUEST, "contract_violation", msg.clone()),
            FleetError::Overloaded => (StatusCode::SERVICE_UNAVAILABLE, "overloaded", "server overloaded".to_string()),
            FleetError::QueueFull => (StatusCode::CONFLICT, "queue_full", "command queue is full".to_string()),
            FleetError::NotFound => (StatusCode::NOT_FOUND, "not_found", "resource not found".to_string()),
            FleetError::Other(e) => {
                tracing::error!(error = %e, reference = %reference, "unexpected fault");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error".to_string())
            }
        };
        if !matches!(self, FleetError::Other(_)) {
            tracing::warn!(code, reference = %reference, "request rejected");
        }
        let mut response = (status, Json(ErrorBody { code, message, reference })).into_response();
        if matches!(self, FleetError::Overloaded) {
            response
                .headers_mut()
                .insert("Retry-After", axum::http::HeaderValue::from_static("5"));
        }
        response
    }
}
