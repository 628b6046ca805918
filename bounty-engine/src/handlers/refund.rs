use axum::{extract::State, http::HeaderMap, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::EngineResult;
use crate::handlers::account_id;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub bounty_id: String,
    /// EIP-191 signature over `refund:{bountyId}` from the sponsor's funding
    /// wallet; lets the sponsor self-serve without a session.
    pub sponsor_signature: Option<String>,
}

/// Refund an expired bounty to its sponsor.
pub async fn request_refund(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RefundRequest>,
) -> EngineResult<Json<Value>> {
    let caller = account_id(&headers);

    let receipt = state
        .executor
        .refund(
            &req.bounty_id,
            caller.as_deref(),
            req.sponsor_signature.as_deref(),
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "txHash": receipt.tx_hash,
        "blockNumber": receipt.block_number,
    })))
}
