use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::db::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures surfaced by the HTTP handlers. Responses carry the status code
/// and the error text as a plain-text body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("todo {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("rendering page: {0}")]
    Render(#[from] std::fmt::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Store(StoreError::Cancelled) => tracing::warn!("request abandoned: {self}"),
            _ if status.is_server_error() => tracing::error!("request failed: {self}"),
            _ => tracing::debug!(status = status.as_u16(), "{self}"),
        }
        (status, self.to_string()).into_response()
    }
}
