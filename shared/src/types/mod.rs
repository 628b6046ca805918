//! Common API envelope types shared across MergePay services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard JSON envelope returned by every MergePay endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let resp = ApiResponse::success("payload");
        assert!(resp.success);
        assert_eq!(resp.data.unwrap(), "payload");
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_error_envelope() {
        let resp: ApiResponse<()> = ApiResponse::error("NOT_FOUND", "no such bounty");
        assert!(!resp.success);
        assert!(resp.data.is_none());

        let err = resp.error.unwrap();
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, "no such bounty");
    }

    #[test]
    fn test_error_fields_skipped_in_success_json() {
        let json = serde_json::to_string(&ApiResponse::success(1)).unwrap();
        assert!(!json.contains("\"error\""));
    }
}
