//! Payout and refund execution.
//!
//! Every attempt re-runs the full precondition set before touching the
//! chain, so a caller-initiated retry of a `failed` claim that actually
//! succeeded on-chain is reconciled instead of double-paid. Writes are
//! single-flight per bounty and survive caller disconnects: once submitted,
//! the transaction is tracked to completion in a spawned task.

use chrono::Utc;
use ethers::types::{Address, Signature};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::blockchain::id;
use crate::error::{EngineError, EngineResult};
use crate::models::{AllowlistEntry, Bounty, BountyStatus, PrClaim, WalletDirectory};
use crate::network::NetworkRegistry;
use crate::services::flight::FlightGuard;
use crate::services::notifier::{Notification, Notifier};

/// Confirmed settlement, returned to the caller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SettlementReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

pub struct PayoutExecutor {
    pool: PgPool,
    registry: Arc<NetworkRegistry>,
    flights: FlightGuard,
    wallets: Arc<dyn WalletDirectory>,
    notifier: Notifier,
    environment: String,
}

impl PayoutExecutor {
    pub fn new(
        pool: PgPool,
        registry: Arc<NetworkRegistry>,
        flights: FlightGuard,
        wallets: Arc<dyn WalletDirectory>,
        notifier: Notifier,
        environment: String,
    ) -> Self {
        Self {
            pool,
            registry,
            flights,
            wallets,
            notifier,
            environment,
        }
    }

    /// Resolve a bounty to the claiming PR author's linked wallet.
    pub async fn pay_claim(&self, claim_id: Uuid) -> EngineResult<SettlementReceipt> {
        let claim = PrClaim::find_by_id(&self.pool, claim_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("no claim with id {claim_id}")))?;

        let bounty = Bounty::find_by_id(&self.pool, &claim.bounty_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("no bounty with id {}", claim.bounty_id))
            })?;

        check_payout_preconditions(&bounty, &claim, &self.environment)?;

        let payout_address = self
            .wallets
            .payout_address(&claim.pr_author_external_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "PR author '{}' has no linked payout wallet",
                    claim.pr_author_external_id
                ))
            })?;

        let payout_hex = format!("{payout_address:#x}");
        if !AllowlistEntry::permits(&self.pool, &bounty.bounty_id, &payout_hex).await? {
            return Err(EngineError::Forbidden(format!(
                "address {payout_hex} is not on the bounty's allowlist"
            )));
        }

        // Single-flight: a concurrent payout or refund for this bounty is
        // rejected, never executed alongside.
        let permit = self
            .flights
            .acquire(FlightGuard::bounty_key(&bounty.bounty_id))?;

        // Re-check under the permit: another request may have settled the
        // claim between precondition check and acquisition.
        if PrClaim::paid_exists(&self.pool, &bounty.bounty_id).await? {
            return Err(EngineError::Conflict(format!(
                "bounty {} already has a paid claim",
                bounty.bounty_id
            )));
        }

        let adapter = self.registry.adapter(&bounty.network)?;
        let raw_id = id::parse_bounty_id(&bounty.bounty_id)?;

        let pool = self.pool.clone();
        let notifier = self.notifier.clone();
        let bounty_id = bounty.bounty_id.clone();

        // Tracked to completion even if the HTTP caller disconnects; the
        // permit travels with the task so the key stays held until the
        // outcome is recorded.
        let task = tokio::spawn(async move {
            let _permit = permit;

            let outcome = match adapter.resolve(raw_id, payout_address).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let _ = PrClaim::mark_failed(&pool, claim_id, &e.to_string()).await;
                    return Err(e);
                }
            };

            if !outcome.success {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "transaction failed".to_string());
                let _ = PrClaim::mark_failed(&pool, claim_id, &reason).await;
                notifier.submit(Notification::PayoutFailed {
                    bounty_id: bounty_id.clone(),
                    claim_id,
                    reason: reason.clone(),
                });
                return Err(EngineError::ContractRevert(reason));
            }

            let tx_hash = outcome.tx_hash.clone().unwrap_or_default();

            // Money has moved. Record the claim first; if the bounty write
            // is lost the reconciler catches it up from chain state.
            match PrClaim::mark_paid(&pool, claim_id, &tx_hash).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(%claim_id, "claim was already marked paid while settling");
                }
                Err(e) => {
                    error!(
                        %claim_id,
                        error = %e,
                        "payout confirmed on-chain but claim update failed; reconciler will converge"
                    );
                }
            }

            if let Err(e) =
                Bounty::settle(&pool, &bounty_id, BountyStatus::Resolved, Some(&tx_hash)).await
            {
                error!(
                    bounty_id = %bounty_id,
                    error = %e,
                    "payout confirmed on-chain but bounty update failed; reconciler will converge"
                );
            }

            info!(bounty_id = %bounty_id, %claim_id, tx_hash = %tx_hash, "bounty paid out");
            notifier.submit(Notification::PayoutSucceeded {
                bounty_id,
                claim_id,
                tx_hash: tx_hash.clone(),
            });

            Ok(SettlementReceipt {
                tx_hash,
                block_number: outcome.block_number,
            })
        });

        task.await
            .map_err(|e| EngineError::Internal(format!("payout task aborted: {e}")))?
    }

    /// Refund an expired bounty to its sponsor. The caller must be the
    /// sponsor (matched on external account id) or present a wallet
    /// signature over `refund:{bountyId}` recovering to the sponsor address.
    pub async fn refund(
        &self,
        bounty_id: &str,
        caller_external_id: Option<&str>,
        sponsor_signature: Option<&str>,
    ) -> EngineResult<SettlementReceipt> {
        let bounty = Bounty::find_by_id(&self.pool, bounty_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("no bounty with id {bounty_id}")))?;

        check_refund_preconditions(&bounty, Utc::now().timestamp())?;
        authorize_refund(&bounty, caller_external_id, sponsor_signature)?;

        let permit = self
            .flights
            .acquire(FlightGuard::bounty_key(&bounty.bounty_id))?;

        let adapter = self.registry.adapter(&bounty.network)?;
        let raw_id = id::parse_bounty_id(&bounty.bounty_id)?;

        let pool = self.pool.clone();
        let notifier = self.notifier.clone();
        let bounty_id = bounty.bounty_id.clone();

        let task = tokio::spawn(async move {
            let _permit = permit;

            let outcome = adapter.refund_expired(raw_id).await?;

            if !outcome.success {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "transaction failed".to_string());
                return Err(EngineError::ContractRevert(reason));
            }

            let tx_hash = outcome.tx_hash.clone().unwrap_or_default();

            if let Err(e) =
                Bounty::settle(&pool, &bounty_id, BountyStatus::Refunded, Some(&tx_hash)).await
            {
                error!(
                    bounty_id = %bounty_id,
                    error = %e,
                    "refund confirmed on-chain but bounty update failed; reconciler will converge"
                );
            }

            info!(bounty_id = %bounty_id, tx_hash = %tx_hash, "bounty refunded");
            notifier.submit(Notification::RefundProcessed {
                bounty_id,
                tx_hash: tx_hash.clone(),
            });

            Ok(SettlementReceipt {
                tx_hash,
                block_number: outcome.block_number,
            })
        });

        task.await
            .map_err(|e| EngineError::Internal(format!("refund task aborted: {e}")))?
    }
}

/// All payout preconditions; re-run on every attempt including retries.
pub fn check_payout_preconditions(
    bounty: &Bounty,
    claim: &PrClaim,
    environment: &str,
) -> EngineResult<()> {
    let claim_status = claim.parsed_status()?;
    if !claim_status.is_payable() {
        return Err(EngineError::Validation(format!(
            "claim is '{}' and cannot be (re-)paid",
            claim.status
        )));
    }

    let bounty_status = bounty.parsed_status()?;
    if bounty_status != BountyStatus::Open {
        return Err(EngineError::Validation(format!(
            "bounty is '{}', only open bounties can be paid out",
            bounty.status
        )));
    }

    if bounty.environment != environment {
        return Err(EngineError::Validation(format!(
            "bounty belongs to environment '{}', this service runs '{}'",
            bounty.environment, environment
        )));
    }

    if bounty.network.is_empty() {
        return Err(EngineError::Validation(
            "bounty has no network recorded".to_string(),
        ));
    }

    Ok(())
}

/// Refund requires an open bounty whose derived lifecycle is expired.
pub fn check_refund_preconditions(bounty: &Bounty, now: i64) -> EngineResult<()> {
    let status = bounty.parsed_status()?;
    if status != BountyStatus::Open {
        return Err(EngineError::Validation(format!(
            "bounty is '{}', only open bounties can be refunded",
            bounty.status
        )));
    }

    if !bounty.is_refund_eligible(now) {
        return Err(EngineError::Validation(
            "bounty deadline has not passed; refund is not yet available".to_string(),
        ));
    }

    Ok(())
}

fn authorize_refund(
    bounty: &Bounty,
    caller_external_id: Option<&str>,
    sponsor_signature: Option<&str>,
) -> EngineResult<()> {
    if let Some(caller) = caller_external_id {
        if caller == bounty.sponsor_external_id {
            return Ok(());
        }
    }

    if let Some(signature) = sponsor_signature {
        if verify_sponsor_signature(&bounty.bounty_id, &bounty.sponsor_address, signature)? {
            return Ok(());
        }
        return Err(EngineError::Unauthorized(
            "signature does not recover to the sponsor wallet".to_string(),
        ));
    }

    Err(EngineError::Forbidden(
        "only the bounty sponsor may request a refund".to_string(),
    ))
}

/// Verify an EIP-191 personal signature over `refund:{bountyId}` against the
/// sponsor's funding wallet.
pub fn verify_sponsor_signature(
    bounty_id: &str,
    sponsor_address: &str,
    signature: &str,
) -> EngineResult<bool> {
    let signature = Signature::from_str(signature.trim_start_matches("0x"))
        .map_err(|_| EngineError::Validation("malformed wallet signature".to_string()))?;

    let sponsor = sponsor_address
        .parse::<Address>()
        .map_err(|_| EngineError::Internal("stored sponsor address is invalid".to_string()))?;

    let message = format!("refund:{bounty_id}");
    match signature.recover(message.as_str()) {
        Ok(recovered) => Ok(recovered == sponsor),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ethers::signers::{LocalWallet, Signer};
    use rust_decimal::Decimal;

    fn bounty(status: &str, deadline: i64, environment: &str) -> Bounty {
        Bounty {
            bounty_id: "0x48842cb5f60238bbfb40c1647f9133d82c01aac912a6b4e3183fcc8767ca1776"
                .to_string(),
            repo_full_name: "acme/widgets".to_string(),
            repo_id: 123456789,
            issue_number: 42,
            sponsor_address: "0x742d35cc6634c0532925a3b8d404c8f89f6562b6".to_string(),
            sponsor_external_id: "gh-1001".to_string(),
            token: "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238".to_string(),
            token_symbol: "USDC".to_string(),
            token_decimals: 6,
            amount: Decimal::from(500_000_000_u64),
            deadline,
            status: status.to_string(),
            tx_hash: None,
            network: "sepolia".to_string(),
            chain_id: 11155111,
            environment: environment.to_string(),
            pinned_comment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn claim(status: &str) -> PrClaim {
        PrClaim {
            id: Uuid::new_v4(),
            bounty_id: "0x48842cb5f60238bbfb40c1647f9133d82c01aac912a6b4e3183fcc8767ca1776"
                .to_string(),
            pr_number: 7,
            pr_author_external_id: "gh-2002".to_string(),
            status: status.to_string(),
            error_message: None,
            created_at: Utc::now(),
            resolved_at: None,
            tx_hash: None,
        }
    }

    #[test]
    fn test_payout_preconditions_happy_path() {
        let now = Utc::now().timestamp();
        let b = bounty("open", now + 1000, "development");

        assert!(check_payout_preconditions(&b, &claim("pending"), "development").is_ok());
        // Failed claims are retryable.
        assert!(check_payout_preconditions(&b, &claim("failed"), "development").is_ok());
    }

    #[test]
    fn test_payout_rejects_paid_claim() {
        let b = bounty("open", 2_000_000_000, "development");
        let err = check_payout_preconditions(&b, &claim("paid"), "development").unwrap_err();
        assert!(err.to_string().contains("cannot be (re-)paid"));
    }

    #[test]
    fn test_payout_rejects_settled_bounty() {
        for status in ["resolved", "refunded", "canceled"] {
            let b = bounty(status, 2_000_000_000, "development");
            assert!(
                check_payout_preconditions(&b, &claim("pending"), "development").is_err(),
                "status {status}"
            );
        }
    }

    #[test]
    fn test_payout_rejects_environment_mismatch() {
        let b = bounty("open", 2_000_000_000, "production");
        let err = check_payout_preconditions(&b, &claim("pending"), "development").unwrap_err();
        assert!(err.to_string().contains("environment"));
    }

    #[test]
    fn test_refund_preconditions() {
        let now = Utc::now().timestamp();

        // Not yet expired.
        assert!(check_refund_preconditions(&bounty("open", now + 100, "development"), now).is_err());
        // Expired and open.
        assert!(check_refund_preconditions(&bounty("open", now - 100, "development"), now).is_ok());
        // Terminal statuses are never refundable.
        assert!(
            check_refund_preconditions(&bounty("resolved", now - 100, "development"), now).is_err()
        );
    }

    #[test]
    fn test_refund_authorization_by_external_id() {
        let b = bounty("open", 0, "development");

        assert!(authorize_refund(&b, Some("gh-1001"), None).is_ok());
        assert!(authorize_refund(&b, Some("gh-9999"), None).is_err());
        assert!(authorize_refund(&b, None, None).is_err());
    }

    #[tokio::test]
    async fn test_refund_authorization_by_wallet_signature() {
        let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());
        let sponsor_address = format!("{:#x}", wallet.address());

        let mut b = bounty("open", 0, "development");
        b.sponsor_address = sponsor_address;

        let message = format!("refund:{}", b.bounty_id);
        let signature = wallet.sign_message(message.as_bytes()).await.unwrap();
        let sig_hex = format!("0x{signature}");

        assert!(authorize_refund(&b, None, Some(&sig_hex)).is_ok());

        // A signature from any other wallet is rejected.
        let intruder = LocalWallet::new(&mut ethers::core::rand::thread_rng());
        let bad = intruder.sign_message(message.as_bytes()).await.unwrap();
        assert!(authorize_refund(&b, None, Some(&format!("0x{bad}"))).is_err());
    }

    #[test]
    fn test_malformed_signature_is_rejected() {
        let b = bounty("open", 0, "development");
        assert!(authorize_refund(&b, None, Some("0xnothex")).is_err());
    }
}
