use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use model::payloads::ApiResponse;
use thiserror::Error;
use tracing::error;

use crate::{store::StoreError, submission::SubmitError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Form not found")]
    FormNotFound,

    #[error("{0}")]
    InvalidSettings(String),

    #[error("Form is busy, try again")]
    Contended,

    #[error("Internal error: {0}")]
    InternalError(#[from] StoreError),
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::FormNotFound => AppError::FormNotFound,
            SubmitError::Contended { .. } => AppError::Contended,
            SubmitError::Store(e) => AppError::InternalError(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            AppError::FormNotFound => StatusCode::NOT_FOUND,
            AppError::InvalidSettings { .. } => StatusCode::BAD_REQUEST,
            AppError::Contended => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match self {
            AppError::InternalError(e) => {
                error!("Request failed: {e}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ApiResponse::<()>::failed(message))).into_response()
    }
}
