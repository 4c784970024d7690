//! Error types for the Linkdrop server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use linkdrop_core::SinkError;
use serde_json::json;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid input rejected before reaching the database.
    #[error("invalid {0}")]
    Invalid(&'static str),
}

impl From<StorageError> for SinkError {
    fn from(e: StorageError) -> Self {
        SinkError::Backend(Box::new(e))
    }
}

/// Errors returned by the HTTP API.
///
/// Each renders as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid input")]
    InvalidInput,

    #[error("Invalid device_id")]
    InvalidDeviceId,

    #[error("WebSocket upgrade required")]
    UpgradeRequired,

    #[error("Failed to store link")]
    StoreLink,

    #[error("Failed to register device")]
    RegisterDevice,

    #[error("Failed to fetch devices")]
    FetchDevices,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            ApiError::FetchDevices => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidInput
            | ApiError::InvalidDeviceId
            | ApiError::StoreLink
            | ApiError::RegisterDevice => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::StoreLink.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::UpgradeRequired.status(),
            StatusCode::UPGRADE_REQUIRED
        );
        assert_eq!(ApiError::StoreLink.to_string(), "Failed to store link");
    }

    #[test]
    fn test_storage_error_into_sink_error() {
        let err: SinkError = StorageError::Invalid("url").into();
        assert!(matches!(err, SinkError::Backend(_)));
        assert!(err.to_string().contains("invalid url"));
    }
}
