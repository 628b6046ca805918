use axum::{extract::State, http::HeaderMap, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::handlers::require_account;
use crate::AppState;

fn require_admin(state: &AppState, headers: &HeaderMap) -> EngineResult<String> {
    let caller = require_account(headers)?;

    if !state.config.admin.is_admin(&caller) {
        return Err(EngineError::Forbidden(
            "caller is not on the admin allowlist".to_string(),
        ));
    }

    Ok(caller)
}

/// Fee snapshot across all configured networks. One unreachable network
/// reports its error in place; the rest still report numbers.
pub async fn get_fees(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> EngineResult<Json<Value>> {
    require_admin(&state, &headers)?;

    let networks = state.fees.report().await;

    Ok(Json(json!({ "success": true, "networks": networks })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawFeesRequest {
    pub network: String,
    pub treasury: String,
    /// Integer amount in the token's smallest unit.
    pub amount: String,
}

/// Withdraw accrued protocol fees on one network to the treasury.
pub async fn withdraw_fees(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<WithdrawFeesRequest>,
) -> EngineResult<Json<Value>> {
    let caller = require_admin(&state, &headers)?;

    let receipt = state
        .fees
        .withdraw(&req.network, &req.treasury, &req.amount)
        .await?;

    info!(
        admin = %caller,
        network = %req.network,
        amount = %req.amount,
        tx_hash = %receipt.tx_hash,
        "admin fee withdrawal"
    );

    Ok(Json(json!({
        "success": true,
        "txHash": receipt.tx_hash,
        "blockNumber": receipt.block_number,
    })))
}
