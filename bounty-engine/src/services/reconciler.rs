//! State reconciliation: on-chain escrow state is authoritative, the local
//! database is a cache. For every stored `open` bounty we pull `getBounty`
//! from its network and overwrite the stored status when the chain has moved
//! on without us (e.g. a direct contract call). Each bounty reconciles
//! independently; one failure never aborts the rest.

use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::blockchain::{id, EscrowReader, OnChainStatus};
use crate::error::EngineResult;
use crate::models::{Bounty, BountyStatus};
use crate::network::NetworkRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpdate {
    pub bounty_id: String,
    pub status: BountyStatus,
}

/// Decide whether the stored status must change given on-chain truth.
/// Returns `None` when the DB already agrees (reconciliation is a no-op on
/// converged state) or when the chain has nothing to teach us.
pub fn merge_status(stored: BountyStatus, on_chain: OnChainStatus) -> Option<BountyStatus> {
    let target = match on_chain {
        OnChainStatus::Resolved => BountyStatus::Resolved,
        OnChainStatus::Refunded => BountyStatus::Refunded,
        // Open on-chain: nothing diverged. None: the contract does not know
        // the id (not yet mined, or wrong network) - keep the stored value.
        OnChainStatus::Open | OnChainStatus::None => return None,
    };

    (stored != target).then_some(target)
}

/// Fan out reads over the given bounties (bounded) and collect the status
/// overwrites that on-chain truth demands. Read failures are logged and the
/// bounty keeps its previous DB value.
pub async fn plan_updates(
    bounties: &[Bounty],
    readers: &HashMap<String, Arc<dyn EscrowReader>>,
    fanout_limit: usize,
) -> Vec<PlannedUpdate> {
    let updates: Vec<Option<PlannedUpdate>> = stream::iter(bounties.iter().cloned())
        .map(|bounty| {
            let reader = readers.get(&bounty.network).cloned();
            async move { plan_one(&bounty, reader).await }
        })
        .buffer_unordered(fanout_limit.max(1))
        .collect()
        .await;

    updates.into_iter().flatten().collect()
}

async fn plan_one(
    bounty: &Bounty,
    reader: Option<Arc<dyn EscrowReader>>,
) -> Option<PlannedUpdate> {
    let Some(reader) = reader else {
        warn!(
            bounty_id = %bounty.bounty_id,
            network = %bounty.network,
            "no reader for network, skipping reconciliation"
        );
        return None;
    };

    let stored = match bounty.parsed_status() {
        Ok(status) => status,
        Err(e) => {
            warn!(bounty_id = %bounty.bounty_id, error = %e, "unreadable stored status");
            return None;
        }
    };

    let raw_id = match id::parse_bounty_id(&bounty.bounty_id) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(bounty_id = %bounty.bounty_id, error = %e, "unparseable bounty id");
            return None;
        }
    };

    match reader.get_bounty(raw_id).await {
        Ok(on_chain) => {
            merge_status(stored, on_chain.status).map(|status| PlannedUpdate {
                bounty_id: bounty.bounty_id.clone(),
                status,
            })
        }
        Err(e) => {
            // Keep the previous DB value; a later pass will retry.
            warn!(
                bounty_id = %bounty.bounty_id,
                network = %bounty.network,
                error = %e,
                "reconciliation read failed"
            );
            None
        }
    }
}

/// Persist planned overwrites. Guarded updates keep this idempotent: a row
/// settled by a concurrent writer is simply skipped.
pub async fn apply_updates(pool: &PgPool, updates: &[PlannedUpdate]) -> EngineResult<usize> {
    let mut applied = 0;
    for update in updates {
        match Bounty::settle(pool, &update.bounty_id, update.status, None).await {
            Ok(true) => {
                info!(
                    bounty_id = %update.bounty_id,
                    status = update.status.as_str(),
                    "reconciled bounty from on-chain state"
                );
                applied += 1;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(bounty_id = %update.bounty_id, error = %e, "failed to persist reconciliation");
            }
        }
    }
    Ok(applied)
}

/// Reconcile the `open` subset of the given bounties against their networks.
/// Returns how many rows were overwritten.
pub async fn reconcile(
    pool: &PgPool,
    registry: &NetworkRegistry,
    bounties: &[Bounty],
    fanout_limit: usize,
) -> EngineResult<usize> {
    let open: Vec<Bounty> = bounties
        .iter()
        .filter(|b| b.status == BountyStatus::Open.as_str())
        .cloned()
        .collect();

    if open.is_empty() {
        return Ok(0);
    }

    let mut readers: HashMap<String, Arc<dyn EscrowReader>> = HashMap::new();
    for (config, adapter) in registry.iter_adapters() {
        readers.insert(config.alias.clone(), adapter as Arc<dyn EscrowReader>);
    }

    let updates = plan_updates(&open, &readers, fanout_limit).await;
    apply_updates(pool, &updates).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::escrow::MockEscrowReader;
    use crate::blockchain::OnChainBounty;
    use crate::error::EngineError;
    use chrono::Utc;
    use ethers::types::{Address, U256};
    use rust_decimal::Decimal;

    fn bounty(id: &str, network: &str, status: &str) -> Bounty {
        Bounty {
            bounty_id: id.to_string(),
            repo_full_name: "acme/widgets".to_string(),
            repo_id: 1,
            issue_number: 1,
            sponsor_address: "0x742d35cc6634c0532925a3b8d404c8f89f6562b6".to_string(),
            sponsor_external_id: "gh-1".to_string(),
            token: "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238".to_string(),
            token_symbol: "USDC".to_string(),
            token_decimals: 6,
            amount: Decimal::from(1_000_000_u64),
            deadline: 2_000_000_000,
            status: status.to_string(),
            tx_hash: None,
            network: network.to_string(),
            chain_id: 11155111,
            environment: "development".to_string(),
            pinned_comment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn on_chain(status: OnChainStatus) -> OnChainBounty {
        OnChainBounty {
            repo_id_hash: [0u8; 32],
            sponsor: Address::zero(),
            resolver: Address::zero(),
            amount: U256::from(1_000_000u64),
            deadline: U256::from(2_000_000_000u64),
            issue_number: U256::one(),
            status,
        }
    }

    const ID_A: &str = "0x48842cb5f60238bbfb40c1647f9133d82c01aac912a6b4e3183fcc8767ca1776";
    const ID_B: &str = "0xf34bbb8c8f8047d02eada69653a932f32be21725cc368a6b3e60e4fc2e4529fd";

    #[test]
    fn test_merge_status_truth_table() {
        use BountyStatus::*;

        assert_eq!(merge_status(Open, OnChainStatus::Resolved), Some(Resolved));
        assert_eq!(merge_status(Open, OnChainStatus::Refunded), Some(Refunded));
        assert_eq!(merge_status(Open, OnChainStatus::Open), None);
        assert_eq!(merge_status(Open, OnChainStatus::None), None);
        // Converged state is a no-op on every subsequent pass.
        assert_eq!(merge_status(Resolved, OnChainStatus::Resolved), None);
        assert_eq!(merge_status(Refunded, OnChainStatus::Refunded), None);
    }

    #[tokio::test]
    async fn test_divergent_bounty_is_planned_then_converges() {
        let mut mock = MockEscrowReader::new();
        mock.expect_get_bounty()
            .returning(|_| Ok(on_chain(OnChainStatus::Resolved)));

        let mut readers: HashMap<String, Arc<dyn EscrowReader>> = HashMap::new();
        readers.insert("sepolia".to_string(), Arc::new(mock));

        // First pass: DB says open, chain says resolved -> one overwrite.
        let open = vec![bounty(ID_A, "sepolia", "open")];
        let updates = plan_updates(&open, &readers, 4).await;
        assert_eq!(
            updates,
            vec![PlannedUpdate {
                bounty_id: ID_A.to_string(),
                status: BountyStatus::Resolved,
            }]
        );

        // Second pass over the converged row: no-op.
        let converged = vec![bounty(ID_A, "sepolia", "resolved")];
        let updates = plan_updates(&converged, &readers, 4).await;
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_network_does_not_abort_the_rest() {
        let mut failing = MockEscrowReader::new();
        failing
            .expect_get_bounty()
            .returning(|_| Err(EngineError::TransientChain("rpc timeout".to_string())));

        let mut healthy = MockEscrowReader::new();
        healthy
            .expect_get_bounty()
            .returning(|_| Ok(on_chain(OnChainStatus::Refunded)));

        let mut readers: HashMap<String, Arc<dyn EscrowReader>> = HashMap::new();
        readers.insert("sepolia".to_string(), Arc::new(failing));
        readers.insert("base-sepolia".to_string(), Arc::new(healthy));

        let bounties = vec![
            bounty(ID_A, "sepolia", "open"),
            bounty(ID_B, "base-sepolia", "open"),
        ];

        let updates = plan_updates(&bounties, &readers, 4).await;
        assert_eq!(
            updates,
            vec![PlannedUpdate {
                bounty_id: ID_B.to_string(),
                status: BountyStatus::Refunded,
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_network_is_skipped() {
        let readers: HashMap<String, Arc<dyn EscrowReader>> = HashMap::new();
        let bounties = vec![bounty(ID_A, "ghost-net", "open")];

        let updates = plan_updates(&bounties, &readers, 4).await;
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn test_open_on_chain_keeps_db_value() {
        let mut mock = MockEscrowReader::new();
        mock.expect_get_bounty()
            .returning(|_| Ok(on_chain(OnChainStatus::Open)));

        let mut readers: HashMap<String, Arc<dyn EscrowReader>> = HashMap::new();
        readers.insert("sepolia".to_string(), Arc::new(mock));

        let updates = plan_updates(&[bounty(ID_A, "sepolia", "open")], &readers, 4).await;
        assert!(updates.is_empty());
    }
}
