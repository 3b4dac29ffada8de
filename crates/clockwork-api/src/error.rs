use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

/// Field name -> messages for that field.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors returned by HTTP handlers. Each maps to one status code and a
/// `{error, status}` JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("invalid form")]
    Validation(FieldErrors),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Single-field validation failure.
    pub fn field(name: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(name.to_string(), vec![message.into()]);
        Self::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Internal(e) => {
                error!(error.cause_chain = ?e, error.message = %e, "internal error");
                json!({ "error": "Internal server error", "status": status.as_u16() })
            }
            Self::Validation(fields) => {
                json!({ "error": "Invalid form", "status": status.as_u16(), "fields": fields })
            }
            other => json!({ "error": other.to_string(), "status": status.as_u16() }),
        };
        (status, Json(body)).into_response()
    }
}
