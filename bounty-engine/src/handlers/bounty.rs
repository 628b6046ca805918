use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use ethers::types::{Address, H256, U64};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::blockchain::id::{derive_bounty_id, format_bounty_id, hash_repo_id};
use crate::error::{EngineError, EngineResult};
use crate::handlers::{require_account, ACCOUNT_HEADER};
use crate::models::{AllowlistEntry, Bounty, BountyStatus, Lifecycle, PrClaim};
use crate::services::reconciler;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBountyRequest {
    #[validate(length(min = 3, max = 140))]
    pub repo_full_name: String,
    pub repo_id: u64,
    #[validate(range(min = 1))]
    pub issue_number: u64,
    pub sponsor_address: String,
    /// Token contract address; must match the network's configured token.
    pub token: String,
    /// Integer amount in the token's smallest unit.
    pub amount: String,
    /// Unix seconds.
    pub deadline: i64,
    /// Hash of the already-mined funding transaction.
    pub tx_hash: String,
    pub installation_id: Option<i64>,
    pub network: String,
}

/// Create the off-chain record for a bounty funded on-chain. The submitted
/// transaction hash is checked against the resolved network's chain: the
/// receipt must exist, have succeeded, and target that network's escrow.
/// The request body's network field is thereby verified, not trusted.
pub async fn create_bounty(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateBountyRequest>,
) -> EngineResult<Json<Value>> {
    let sponsor_external_id = require_account(&headers)?;

    req.validate()
        .map_err(|e| EngineError::Validation(e.to_string()))?;

    let sponsor: Address = req
        .sponsor_address
        .parse()
        .map_err(|_| EngineError::Validation("sponsorAddress is not a valid address".into()))?;

    let network = state.registry.resolve(&req.network)?.clone();

    let token: Address = req
        .token
        .parse()
        .map_err(|_| EngineError::Validation("token is not a valid address".into()))?;
    if token != network.token_address {
        return Err(EngineError::Validation(format!(
            "token {token:#x} is not the configured token for network '{}'",
            network.alias
        )));
    }

    let amount = Decimal::from_str(&req.amount)
        .map_err(|_| EngineError::Validation("amount must be a decimal integer string".into()))?;
    if amount <= Decimal::ZERO || !amount.fract().is_zero() {
        return Err(EngineError::Validation(
            "amount must be a positive integer in the token's smallest unit".into(),
        ));
    }

    let tx_hash: H256 = req
        .tx_hash
        .parse()
        .map_err(|_| EngineError::Validation("txHash is not a valid transaction hash".into()))?;

    verify_funding_tx(&state, &network.alias, tx_hash, network.escrow_address).await?;

    let bounty_id = format_bounty_id(&derive_bounty_id(
        sponsor,
        hash_repo_id(req.repo_id),
        req.issue_number,
        network.chain_id,
    ));

    let now = Utc::now();
    let bounty = Bounty {
        bounty_id: bounty_id.clone(),
        repo_full_name: req.repo_full_name,
        repo_id: req.repo_id as i64,
        issue_number: req.issue_number as i64,
        sponsor_address: format!("{sponsor:#x}"),
        sponsor_external_id,
        token: format!("{token:#x}"),
        token_symbol: network.token_symbol.clone(),
        token_decimals: network.token_decimals as i32,
        amount,
        deadline: req.deadline,
        status: BountyStatus::Open.as_str().to_string(),
        tx_hash: Some(format!("{tx_hash:#x}")),
        network: network.alias.clone(),
        chain_id: network.chain_id as i64,
        environment: state.config.environment.clone(),
        pinned_comment_id: None,
        created_at: now,
        updated_at: now,
    };

    let created = Bounty::create(&state.db_pool, &bounty).await?;
    if !created {
        return Err(EngineError::Conflict(format!(
            "bounty {bounty_id} already exists"
        )));
    }

    info!(bounty_id = %bounty_id, network = %network.alias, "bounty created");

    Ok(Json(json!({ "success": true, "bountyId": bounty_id })))
}

async fn verify_funding_tx(
    state: &AppState,
    alias: &str,
    tx_hash: H256,
    escrow: Address,
) -> EngineResult<()> {
    let adapter = state.registry.adapter(alias)?;

    let receipt = adapter
        .transaction_receipt(tx_hash)
        .await?
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "transaction {tx_hash:#x} was not found on network '{alias}'; wait until it is mined"
            ))
        })?;

    if receipt.status != Some(U64::from(1)) {
        return Err(EngineError::Validation(format!(
            "funding transaction {tx_hash:#x} reverted on network '{alias}'"
        )));
    }

    if receipt.to != Some(escrow) {
        return Err(EngineError::Validation(format!(
            "transaction {tx_hash:#x} does not target the escrow contract on network '{alias}'"
        )));
    }

    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BountyView {
    pub bounty_id: String,
    pub repo_full_name: String,
    pub issue_number: i64,
    pub amount: String,
    pub token_symbol: String,
    pub token_decimals: i32,
    pub deadline: i64,
    pub status: String,
    pub tx_hash: Option<String>,
    pub network: String,
    pub chain_id: i64,
    pub lifecycle: Lifecycle,
}

impl BountyView {
    fn from_bounty(bounty: &Bounty, now: i64) -> EngineResult<Self> {
        Ok(Self {
            bounty_id: bounty.bounty_id.clone(),
            repo_full_name: bounty.repo_full_name.clone(),
            issue_number: bounty.issue_number,
            amount: bounty.amount.to_string(),
            token_symbol: bounty.token_symbol.clone(),
            token_decimals: bounty.token_decimals,
            deadline: bounty.deadline,
            status: bounty.status.clone(),
            tx_hash: bounty.tx_hash.clone(),
            network: bounty.network.clone(),
            chain_id: bounty.chain_id,
            lifecycle: bounty.lifecycle(now)?,
        })
    }
}

/// Session-scoped bounty list with derived lifecycle. Open bounties are
/// lazily reconciled against their chains before the response is built, so
/// a settlement made behind our back shows up here without a webhook.
pub async fn user_bounties(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> EngineResult<Json<Value>> {
    let sponsor_external_id = require_account(&headers)?;

    let bounties = Bounty::find_by_sponsor(&state.db_pool, &sponsor_external_id).await?;

    let reconciled = reconciler::reconcile(
        &state.db_pool,
        &state.registry,
        &bounties,
        state.config.reconciler.fanout_limit,
    )
    .await?;

    // Re-read only when reconciliation actually rewrote something.
    let bounties = if reconciled > 0 {
        Bounty::find_by_sponsor(&state.db_pool, &sponsor_external_id).await?
    } else {
        bounties
    };

    let now = Utc::now().timestamp();
    let views = bounties
        .iter()
        .map(|b| BountyView::from_bounty(b, now))
        .collect::<EngineResult<Vec<_>>>()?;

    Ok(Json(json!({ "success": true, "bounties": views })))
}

/// Single-bounty detail with its claims and allowlist.
pub async fn bounty_detail(
    State(state): State<Arc<AppState>>,
    Path(bounty_id): Path<String>,
) -> EngineResult<Json<Value>> {
    let bounty = Bounty::find_by_id(&state.db_pool, &bounty_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("no bounty with id {bounty_id}")))?;

    let claims = PrClaim::find_by_bounty(&state.db_pool, &bounty_id).await?;
    let allowlist = AllowlistEntry::list_for_bounty(&state.db_pool, &bounty_id).await?;

    let view = BountyView::from_bounty(&bounty, Utc::now().timestamp())?;

    Ok(Json(json!({
        "success": true,
        "bounty": view,
        "claims": claims,
        "allowlist": allowlist.iter().map(|e| e.allowed_address.clone()).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistRequest {
    pub address: String,
}

/// Add an address to a bounty's allowlist. Sponsor-managed.
pub async fn add_allowlist_entry(
    State(state): State<Arc<AppState>>,
    Path(bounty_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AllowlistRequest>,
) -> EngineResult<Json<Value>> {
    let bounty = authorize_sponsor(&state, &bounty_id, &headers).await?;

    let address: Address = req
        .address
        .parse()
        .map_err(|_| EngineError::Validation("address is not a valid address".into()))?;

    AllowlistEntry::add(&state.db_pool, &bounty.bounty_id, &format!("{address:#x}")).await?;

    Ok(Json(json!({ "success": true })))
}

/// Remove an address from a bounty's allowlist. Sponsor-managed.
pub async fn remove_allowlist_entry(
    State(state): State<Arc<AppState>>,
    Path(bounty_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AllowlistRequest>,
) -> EngineResult<Json<Value>> {
    let bounty = authorize_sponsor(&state, &bounty_id, &headers).await?;

    let address: Address = req
        .address
        .parse()
        .map_err(|_| EngineError::Validation("address is not a valid address".into()))?;

    let removed =
        AllowlistEntry::remove(&state.db_pool, &bounty.bounty_id, &format!("{address:#x}"))
            .await?;

    Ok(Json(json!({ "success": true, "removed": removed })))
}

async fn authorize_sponsor(
    state: &AppState,
    bounty_id: &str,
    headers: &HeaderMap,
) -> EngineResult<Bounty> {
    let caller = require_account(headers)?;

    let bounty = Bounty::find_by_id(&state.db_pool, bounty_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("no bounty with id {bounty_id}")))?;

    if bounty.sponsor_external_id != caller {
        return Err(EngineError::Forbidden(format!(
            "only the bounty sponsor may manage the allowlist (checked {ACCOUNT_HEADER})"
        )));
    }

    Ok(bounty)
}
