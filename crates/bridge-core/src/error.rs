//! Error types for the bridge core
//!
//! One variant per wire error code, so every failure a handler produces maps
//! to exactly one structured error response.

use bridge_protocol::ErrorCode;
use serde_json::Value;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Wire taxonomy
    // ========================================================================
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{message}")]
    NotFound {
        message: String,
        data: Option<Value>,
    },

    #[error("{message}")]
    Permission {
        message: String,
        data: Option<Value>,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{message}")]
    Failed {
        message: String,
        data: Option<Value>,
    },

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Auth(_) => ErrorCode::Auth,
            Error::InvalidParams(_) => ErrorCode::InvalidParams,
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::Permission { .. } => ErrorCode::Permission,
            Error::Unsupported(_) => ErrorCode::Unsupported,
            // Collaborator failures are reported as E_FAILED with the
            // original message preserved.
            Error::Failed { .. } | Error::Io(_) | Error::Json(_) => ErrorCode::Failed,
        }
    }

    /// Structured diagnostic data attached to the error response, if any.
    pub fn data(&self) -> Option<Value> {
        match self {
            Error::NotFound { data, .. }
            | Error::Permission { data, .. }
            | Error::Failed { data, .. } => data.clone(),
            _ => None,
        }
    }

    /// Not-found error helper
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
            data: None,
        }
    }

    /// Not-found error with diagnostic data
    pub fn not_found_with(message: impl Into<String>, data: Value) -> Self {
        Error::NotFound {
            message: message.into(),
            data: Some(data),
        }
    }

    /// Permission error helper
    pub fn permission(message: impl Into<String>) -> Self {
        Error::Permission {
            message: message.into(),
            data: None,
        }
    }

    /// Permission error with diagnostic data
    pub fn permission_with(message: impl Into<String>, data: Value) -> Self {
        Error::Permission {
            message: message.into(),
            data: Some(data),
        }
    }

    /// Generic failure helper
    pub fn failed(message: impl Into<String>) -> Self {
        Error::Failed {
            message: message.into(),
            data: None,
        }
    }

    /// Generic failure with diagnostic data
    pub fn failed_with(message: impl Into<String>, data: Value) -> Self {
        Error::Failed {
            message: message.into(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Auth("bad token".into()).code(), ErrorCode::Auth);
        assert_eq!(
            Error::InvalidParams("missing uri".into()).code(),
            ErrorCode::InvalidParams
        );
        assert_eq!(Error::not_found("no such task").code(), ErrorCode::NotFound);
        assert_eq!(Error::permission("denied").code(), ErrorCode::Permission);
        assert_eq!(Error::failed("boom").code(), ErrorCode::Failed);
    }

    #[test]
    fn test_error_data_passthrough() {
        let err = Error::failed_with(
            "Document version mismatch",
            json!({"expectedVersion": 3, "actualVersion": 4}),
        );
        let data = err.data().unwrap();
        assert_eq!(data["expectedVersion"], json!(3));
        assert!(Error::Auth("x".into()).data().is_none());
    }
}
