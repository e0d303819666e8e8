//! API 错误类型及其到 HTTP 响应的转换。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::naming::InvalidName;
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(u64),
    TooManyRequests(u64),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::PayloadTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("payload exceeds {limit} bytes"),
            )
                .into_response(),
            ApiError::TooManyRequests(retry_after) => {
                let mut headers = HeaderMap::new();
                if retry_after > 0
                    && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
                {
                    headers.insert(header::RETRY_AFTER, value);
                }
                (StatusCode::TOO_MANY_REQUESTS, headers, "too many requests").into_response()
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {msg}")).into_response()
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidName(err) => err.into(),
            StorageError::NotFound(name) => ApiError::NotFound(format!("File not found: {name}")),
            StorageError::AlreadyExists(name) => {
                ApiError::Conflict(format!("File with new name already exists: {name}"))
            }
            StorageError::Locked(name) => {
                warn!(name, "timed out waiting for entry lock");
                ApiError::Internal(format!("{name} is busy"))
            }
            StorageError::TooLarge(limit) => ApiError::PayloadTooLarge(limit),
            StorageError::Io(err) => {
                error!(error = %err, "storage i/o failure");
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<InvalidName> for ApiError {
    fn from(error: InvalidName) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_failures_are_internal_even_when_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "storage root vanished");
        let response = ApiError::from(StorageError::Io(err)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_entry_is_not_found() {
        let response = ApiError::from(StorageError::NotFound("a.txt".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn lock_timeout_is_internal() {
        let response =
            ApiError::from(StorageError::Locked("received_text.txt".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
