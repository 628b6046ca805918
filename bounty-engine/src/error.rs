use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy for the bounty engine.
///
/// Configuration and validation errors are never retried; transient chain
/// errors are surfaced as retryable (502) and the caller decides whether to
/// hit the retry endpoint; contract reverts are mapped to readable messages
/// and never treated as a local bug.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid network alias '{alias}', valid aliases: {}", .valid.join(", "))]
    InvalidNetwork { alias: String, valid: Vec<String> },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("chain unavailable: {0}")]
    TransientChain(String),

    #[error("contract rejected the call: {0}")]
    ContractRevert(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        EngineError::TransientChain(err.to_string())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        EngineError::Internal(err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::InvalidNetwork { .. } => StatusCode::BAD_REQUEST,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::TransientChain(_) => StatusCode::BAD_GATEWAY,
            EngineError::ContractRevert(_) => StatusCode::BAD_REQUEST,
            EngineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidNetwork { .. } => "INVALID_NETWORK",
            EngineError::Validation(_) => "VALIDATION_FAILED",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Unauthorized(_) => "UNAUTHORIZED",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::TransientChain(_) => "CHAIN_UNAVAILABLE",
            EngineError::ContractRevert(_) => "CONTRACT_REVERT",
            EngineError::Config(_) => "CONFIGURATION",
            EngineError::Database(_) => "DATABASE",
            EngineError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientChain(_))
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            },
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            EngineError::Validation("bad address".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EngineError::Unauthorized("bad signature".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            EngineError::TransientChain("rpc timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            EngineError::Conflict("payout in flight".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_retryable() {
        assert!(EngineError::TransientChain("timeout".into()).is_retryable());
        assert!(!EngineError::Validation("bad".into()).is_retryable());
        assert!(!EngineError::ContractRevert("NotExpired".into()).is_retryable());
    }

    #[test]
    fn test_invalid_network_message_lists_aliases() {
        let err = EngineError::InvalidNetwork {
            alias: "mainnet".into(),
            valid: vec!["sepolia".into(), "base-sepolia".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("mainnet"));
        assert!(msg.contains("sepolia"));
        assert!(msg.contains("base-sepolia"));
    }
}
