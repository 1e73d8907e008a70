//! Error bodies returned by every route

use axum::{extract::rejection::JsonRejection, http::StatusCode, Json};
use serde::Serialize;
use tracing::{error, warn};

use crate::promotion::{Conflict, PromotionError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub kind: &'static str,
    /// Conflicts behind a 409, so operators can resolve them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
}

impl From<PromotionError> for ErrorResponse {
    fn from(err: PromotionError) -> Self {
        Self {
            error: err.to_string(),
            code: err.status_code(),
            kind: err.kind().as_str(),
            conflicts: err.conflicts().to_vec(),
        }
    }
}

/// Handler error type
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map an engine error to its HTTP response.
pub fn api_error(err: PromotionError) -> ApiError {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if err.is_client_error() {
        warn!(status = status.as_u16(), error = %err, "request refused");
    } else {
        error!(status = status.as_u16(), error = %err, "request failed");
    }
    (status, Json(ErrorResponse::from(err)))
}

/// A 400 for input rejected before it reaches the engine.
pub fn bad_request(message: impl Into<String>) -> ApiError {
    api_error(PromotionError::validation(message))
}

/// A 401 for requests without a usable identity.
pub fn unauthenticated(message: impl Into<String>) -> ApiError {
    let message = message.into();
    warn!(error = %message, "unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message,
            code: 401,
            kind: "authentication",
            conflicts: Vec::new(),
        }),
    )
}

/// Unwrap a JSON body, answering malformed or mistyped input with a 400.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(bad_request(rejection.body_text())),
    }
}

/// Like [`json_body`], but a request sent without a JSON body gets `T::default()`.
pub fn optional_json_body<T: Default>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    match body {
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        other => json_body(other),
    }
}
