use axum::{extract::State, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPayoutRequest {
    pub claim_id: Uuid,
}

/// Caller-initiated retry of a claim payout. All preconditions re-run before
/// anything is resubmitted; a claim that already settled on-chain is
/// reconciled instead of paid twice.
pub async fn retry_payout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RetryPayoutRequest>,
) -> EngineResult<Json<Value>> {
    let receipt = state.executor.pay_claim(req.claim_id).await?;

    Ok(Json(json!({
        "success": true,
        "txHash": receipt.tx_hash,
        "blockNumber": receipt.block_number,
    })))
}
