use axum::{body::Bytes, extract::State, http::HeaderMap, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::webhook::parse_event;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

/// GitHub event stream. The HMAC is verified over the raw request bytes
/// before any JSON parsing happens; a parsed-and-reserialized body is never
/// signature-equivalent. Bad signatures are 401 with no side effects.
pub async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> EngineResult<Json<Value>> {
    verify(&headers, &body, state.config.webhooks.github_secret.as_bytes())?;

    let event_name = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EngineError::Validation(format!("missing {EVENT_HEADER} header")))?;

    let event = parse_event(event_name, &body)?;
    let summary = state.processor.process(event).await?;

    Ok(Json(json!({
        "success": true,
        "handled": summary.handled,
        "detail": summary.detail,
    })))
}

/// Marketplace purchase stream: independently signed with its own secret.
pub async fn marketplace_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> EngineResult<Json<Value>> {
    verify(
        &headers,
        &body,
        state.config.webhooks.marketplace_secret.as_bytes(),
    )?;

    let event_name = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("marketplace_purchase");

    let event = parse_event(event_name, &body)?;
    let summary = state.processor.process(event).await?;

    Ok(Json(json!({
        "success": true,
        "handled": summary.handled,
        "detail": summary.detail,
    })))
}

fn verify(headers: &HeaderMap, body: &[u8], secret: &[u8]) -> EngineResult<()> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            EngineError::Unauthorized(format!("missing {SIGNATURE_HEADER} header"))
        })?;

    if !shared::crypto::verify_signature_header(secret, body, signature) {
        warn!("webhook rejected: signature verification failed");
        return Err(EngineError::Unauthorized(
            "webhook signature verification failed".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_signature(secret: &[u8], body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let sig = shared::crypto::signature_header(secret, body);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        headers
    }

    #[test]
    fn test_valid_signature_passes() {
        let secret = b"webhook-secret";
        let body = br#"{"action":"opened"}"#;
        let headers = headers_with_signature(secret, body);

        assert!(verify(&headers, body, secret).is_ok());
    }

    #[test]
    fn test_invalid_signature_is_unauthorized() {
        let body = br#"{"action":"opened"}"#;
        let headers = headers_with_signature(b"wrong-secret", body);

        let err = verify(&headers, body, b"webhook-secret").unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_missing_signature_is_unauthorized() {
        let err = verify(&HeaderMap::new(), b"{}", b"secret").unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[test]
    fn test_tampered_body_is_unauthorized() {
        let secret = b"webhook-secret";
        let headers = headers_with_signature(secret, br#"{"action":"opened"}"#);

        let err = verify(&headers, br#"{"action":"closed"}"#, secret).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }
}
