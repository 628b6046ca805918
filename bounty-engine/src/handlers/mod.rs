pub mod admin;
pub mod bounty;
pub mod health;
pub mod payout;
pub mod refund;
pub mod webhook;

use axum::http::HeaderMap;

use crate::error::{EngineError, EngineResult};

/// External account id of the authenticated caller, injected by the
/// upstream gateway after session validation.
pub const ACCOUNT_HEADER: &str = "x-account-id";

pub fn account_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .filter(|v| !v.is_empty())
}

pub fn require_account(headers: &HeaderMap) -> EngineResult<String> {
    account_id(headers).ok_or_else(|| {
        EngineError::Unauthorized(format!("missing {ACCOUNT_HEADER} header"))
    })
}
