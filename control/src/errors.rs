//! Error types for the fleet control plane

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openapi_server::models::ErrorResponse;
use thiserror::Error;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum ControlError {
    /// Malformed input rejected at the command boundary
    #[error("Validation error: {0}")]
    Validation(String),

    /// The command collides with existing state
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// A guarded status transition was attempted from a non-adjacent state
    #[error("Invalid transition: {entity} {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Conflict without structured details
    pub fn conflict(message: impl Into<String>) -> Self {
        ControlError::Conflict {
            message: message.into(),
            details: None,
        }
    }

    /// Stable machine readable code
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Validation(_) => "validation",
            ControlError::Conflict { .. } => "conflict",
            ControlError::NotFound(_) => "not_found",
            ControlError::InvalidTransition { .. } => "invalid_transition",
            ControlError::Unauthorized(_) => "unauthorized",
            ControlError::Io(_) => "io",
            ControlError::Json(_) => "json",
            ControlError::Config(_) => "config",
            ControlError::Server(_) => "server",
            ControlError::Shutdown(_) => "shutdown",
            ControlError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::Validation(_) | ControlError::Json(_) => StatusCode::BAD_REQUEST,
            ControlError::Conflict { .. } | ControlError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::Unauthorized(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ControlError {
    fn from(err: anyhow::Error) -> Self {
        ControlError::Internal(err.to_string())
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let details = match &self {
            ControlError::Conflict { details, .. } => details.clone(),
            ControlError::InvalidTransition { entity, from, to } => Some(serde_json::json!({
                "entity": entity,
                "from": from,
                "to": to,
            })),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            details,
        };
        (self.status_code(), Json(body)).into_response()
    }
}
