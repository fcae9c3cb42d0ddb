//! Error handling module.
//!
//! Each layer owns its error type:
//! - [`WorkflowError`] aborts a run and maps to a process exit code
//! - [`SyncError`] is advisory and never fails a run
//! - [`StorageError`] covers the key files
//! - [`AppError`] is what HTTP handlers return

pub mod codes;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub use codes::{ErrorCategory, ErrorCode};

/// HTTP-facing error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Another run holds the run slot.
    #[error("A run is already in progress")]
    RunInProgress,

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::RunInProgress => ErrorCode::RUN_IN_PROGRESS,
            Self::NotFound(_) => ErrorCode::NOT_FOUND,
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::RunInProgress => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let code = error_code.as_i32();
        let message = self.to_string();

        tracing::warn!(
            error_code = code,
            category = %error_code.category(),
            status = %status,
            message = %message,
            "Request rejected"
        );

        let mut body = json!({
            "code": code,
            "message": message,
            "data": null
        });

        // Busy triggers keep the `{started, reason}` shape callers poll for.
        if matches!(self, Self::RunInProgress) {
            body["started"] = json!(false);
            body["reason"] = json!("already_running");
        }

        (status, Json(body)).into_response()
    }
}

/// Failure that aborts a key generation run.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Browser could not launch or a host was unreachable.
    #[error("Network error: {0}")]
    Network(String),

    /// Expected page element or state missing within a bounded wait.
    #[error("Automation error: {0}")]
    Automation(String),

    /// A bounded wait (OTP delivery, redirect) elapsed.
    #[error("Timed out waiting for {0}")]
    ExpiredWait(String),

    /// Key store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Unusable configuration detected at run time.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkflowError {
    /// Process exit code recorded for the run.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Network(_) => 2,
            Self::Automation(_) => 3,
            Self::ExpiredWait(_) => 4,
            Self::Storage(_) => 5,
            Self::Config(_) => 6,
        }
    }

    /// Get the error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Network(_) => ErrorCode::NETWORK,
            Self::Automation(_) => ErrorCode::AUTOMATION,
            Self::ExpiredWait(_) => ErrorCode::EXPIRED_WAIT,
            Self::Storage(_) => ErrorCode::STORAGE_ERROR,
            Self::Config(_) => ErrorCode::INVALID_CONFIG,
        }
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Advisory failure while importing keys into gpt-load.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Connection, timeout or body read failure.
    #[error("gpt-load transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("gpt-load returned HTTP {status}: {body}")]
    Http {
        /// Response status.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Envelope with a non-zero `code`.
    #[error("gpt-load rejected the request (code {code}): {message}")]
    Api {
        /// Envelope code.
        code: i64,
        /// Envelope message.
        message: String,
    },

    /// Response body did not match the expected shape.
    #[error("gpt-load response could not be decoded: {0}")]
    Decode(String),

    /// No group matches the configured name.
    #[error("gpt-load group not found: {0}")]
    GroupNotFound(String),

    /// Ledger could not be read or written.
    #[error("sync ledger error: {0}")]
    Ledger(#[from] std::io::Error),
}

impl SyncError {
    /// Transport errors, 429 and 5xx are worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Get the error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::SYNC_TRANSPORT,
            Self::GroupNotFound(_) => ErrorCode::SYNC_GROUP_NOT_FOUND,
            Self::Http { .. } | Self::Api { .. } | Self::Decode(_) => ErrorCode::SYNC_REJECTED,
            Self::Ledger(_) => ErrorCode::STORAGE_ERROR,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Key store error type.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Lock acquisition failed.
    #[error("Failed to acquire lock: {0}")]
    LockFailed(String),

    /// File I/O error.
    #[error("File I/O error: {0}")]
    FileIO(String),

    /// CSV encoding error.
    #[error("CSV error: {0}")]
    Csv(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::FileIO(err.to_string())
    }
}

impl From<csv::Error> for StorageError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err.to_string())
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias using `WorkflowError`.
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

/// Result type alias using `SyncError`.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Result type alias using `StorageError`.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(WorkflowError::Network("x".into()).exit_code(), 2);
        assert_eq!(WorkflowError::Automation("x".into()).exit_code(), 3);
        assert_eq!(WorkflowError::ExpiredWait("otp".into()).exit_code(), 4);
        assert_eq!(
            WorkflowError::from(StorageError::FileIO("disk".into())).exit_code(),
            5
        );
        assert_eq!(WorkflowError::Config("x".into()).exit_code(), 6);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            WorkflowError::ExpiredWait("otp".into()).error_code(),
            ErrorCode::EXPIRED_WAIT
        );
        assert_eq!(AppError::RunInProgress.error_code(), ErrorCode::RUN_IN_PROGRESS);
        assert_eq!(
            AppError::RunInProgress.error_code().category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            WorkflowError::from(StorageError::FileIO("disk".into()))
                .error_code()
                .category(),
            ErrorCategory::Internal
        );
        assert_eq!(
            SyncError::GroupNotFound("g".into()).error_code(),
            ErrorCode::SYNC_GROUP_NOT_FOUND
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::RunInProgress.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::NotFound("/x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_sync_retryable() {
        assert!(SyncError::Transport("reset".into()).is_retryable());
        assert!(
            SyncError::Http {
                status: 429,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            SyncError::Http {
                status: 502,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !SyncError::Http {
                status: 401,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !SyncError::Api {
                code: 1,
                message: "bad".into()
            }
            .is_retryable()
        );
    }
}
