//! Service-boundary error taxonomy and its HTTP mapping.
//!
//! Every handler returns `Result<_, CoreError>`; the body is always
//! `{"error": {"code": "...", "message": "..."}}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::models::SessionStatus;
use crate::server::ai::AiError;
use crate::server::db::StoreError;
use crate::server::voip::AdapterError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No provider available: {0}")]
    NoProvider(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Storage fault")]
    StorageFault(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) | Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NoProvider(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::StorageFault(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Validation(_) => "validation_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::NoProvider(_) => "no_provider",
            Self::Provider(_) => "provider_error",
            Self::SignatureInvalid => "signature_invalid",
            Self::StorageFault(_) => "storage_fault",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {:?}", self);
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("session".to_string()),
            StoreError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            StoreError::ConflictingExternalId => {
                Self::Conflict("external id already assigned".to_string())
            }
            StoreError::Terminal => Self::Conflict("session already ended".to_string()),
            StoreError::InvalidTiming(msg) => Self::Validation(msg),
            StoreError::StorageFault(msg) => Self::StorageFault(msg),
        }
    }
}

impl From<JsonRejection> for CoreError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<AdapterError> for CoreError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Timeout(_) => Self::Timeout(err.to_string()),
            other => Self::Provider(other.to_string()),
        }
    }
}

impl From<AiError> for CoreError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::NoProvider => Self::NoProvider("no AI provider is available".to_string()),
            AiError::Provider { .. } => Self::Provider(err.to_string()),
        }
    }
}
