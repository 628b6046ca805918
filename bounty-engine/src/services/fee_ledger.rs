//! Cross-network protocol fee aggregation and admin-gated withdrawal.

use ethers::types::{Address, U256};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::blockchain::EscrowReader;
use crate::error::{EngineError, EngineResult};
use crate::network::NetworkRegistry;
use crate::services::executor::SettlementReceipt;
use crate::services::flight::FlightGuard;

/// One network's slice of the fee report. A failing network reports its
/// error in place; it never takes the other networks down with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFees {
    pub network: String,
    pub chain_id: u64,
    pub token: String,
    pub token_symbol: String,
    pub available: Option<String>,
    pub total_accrued: Option<String>,
    pub fee_bps: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What `collect_fees` needs to know about one network.
pub struct FeeProbe {
    pub alias: String,
    pub chain_id: u64,
    pub token: Address,
    pub token_symbol: String,
    pub reader: Arc<dyn EscrowReader>,
}

pub struct FeeLedger {
    registry: Arc<NetworkRegistry>,
    flights: FlightGuard,
    fanout_limit: usize,
}

impl FeeLedger {
    pub fn new(
        registry: Arc<NetworkRegistry>,
        flights: FlightGuard,
        fanout_limit: usize,
    ) -> Self {
        Self {
            registry,
            flights,
            fanout_limit,
        }
    }

    /// Fee snapshot for every configured network.
    pub async fn report(&self) -> Vec<NetworkFees> {
        let probes: Vec<FeeProbe> = self
            .registry
            .iter_adapters()
            .map(|(config, adapter)| FeeProbe {
                alias: config.alias.clone(),
                chain_id: config.chain_id,
                token: config.token_address,
                token_symbol: config.token_symbol.clone(),
                reader: adapter as Arc<dyn EscrowReader>,
            })
            .collect();

        collect_fees(probes, self.fanout_limit).await
    }

    /// Withdraw accrued fees on one network to `treasury`. The acting wallet
    /// must equal the contract's `owner()` read on-chain immediately before
    /// the write; configuration is not trusted for this, since ownership can
    /// change independently of it.
    pub async fn withdraw(
        &self,
        alias: &str,
        treasury: &str,
        amount: &str,
    ) -> EngineResult<SettlementReceipt> {
        let config = self.registry.resolve(alias)?.clone();
        let adapter = self.registry.adapter(alias)?;

        let treasury: Address = treasury.parse().map_err(|_| {
            EngineError::Validation(format!("'{treasury}' is not a valid treasury address"))
        })?;

        if treasury == Address::zero() {
            return Err(EngineError::Validation(
                "treasury must not be the zero address".to_string(),
            ));
        }

        let amount = U256::from_dec_str(amount).map_err(|_| {
            EngineError::Validation(format!(
                "'{amount}' is not a valid integer token amount"
            ))
        })?;

        if amount.is_zero() {
            return Err(EngineError::Validation(
                "withdrawal amount must be positive".to_string(),
            ));
        }

        let acting = adapter.signer_address().ok_or_else(|| {
            EngineError::Config(format!(
                "no owner wallet configured for network '{alias}'; fee withdrawal requires one"
            ))
        })?;

        let owner = adapter.owner().await?;
        if owner != acting {
            return Err(EngineError::Forbidden(format!(
                "acting wallet {acting:#x} is not the escrow owner {owner:#x} on '{alias}'"
            )));
        }

        let _permit = self.flights.acquire(FlightGuard::fees_key(
            alias,
            &format!("{:#x}", config.token_address),
        ))?;

        let outcome = adapter
            .withdraw_fees(config.token_address, treasury, amount)
            .await?;

        if !outcome.success {
            let reason = outcome
                .error
                .unwrap_or_else(|| "transaction failed".to_string());
            return Err(EngineError::ContractRevert(reason));
        }

        let tx_hash = outcome.tx_hash.unwrap_or_default();
        info!(network = %alias, treasury = ?treasury, %amount, tx_hash = %tx_hash, "fees withdrawn");

        Ok(SettlementReceipt {
            tx_hash,
            block_number: outcome.block_number,
        })
    }
}

/// Bounded fan-out of the three fee reads per network; per-network failures
/// are captured in the row, not propagated.
pub async fn collect_fees(probes: Vec<FeeProbe>, fanout_limit: usize) -> Vec<NetworkFees> {
    let mut rows: Vec<NetworkFees> = stream::iter(probes)
        .map(|probe| async move { probe_one(probe).await })
        .buffer_unordered(fanout_limit.max(1))
        .collect()
        .await;

    rows.sort_by(|a, b| a.network.cmp(&b.network));
    rows
}

async fn probe_one(probe: FeeProbe) -> NetworkFees {
    let reads = async {
        let available = probe.reader.available_fees(probe.token).await?;
        let total = probe.reader.total_fees_accrued().await?;
        let bps = probe.reader.fee_bps().await?;
        Ok::<_, EngineError>((available, total, bps))
    };

    match reads.await {
        Ok((available, total, bps)) => NetworkFees {
            network: probe.alias,
            chain_id: probe.chain_id,
            token: format!("{:#x}", probe.token),
            token_symbol: probe.token_symbol,
            available: Some(available.to_string()),
            total_accrued: Some(total.to_string()),
            fee_bps: Some(bps),
            error: None,
        },
        Err(e) => {
            warn!(network = %probe.alias, error = %e, "fee read failed");
            NetworkFees {
                network: probe.alias,
                chain_id: probe.chain_id,
                token: format!("{:#x}", probe.token),
                token_symbol: probe.token_symbol,
                available: None,
                total_accrued: None,
                fee_bps: None,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::escrow::MockEscrowReader;

    fn probe(alias: &str, reader: MockEscrowReader) -> FeeProbe {
        FeeProbe {
            alias: alias.to_string(),
            chain_id: 11155111,
            token: "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238".parse().unwrap(),
            token_symbol: "USDC".to_string(),
            reader: Arc::new(reader),
        }
    }

    fn healthy_reader(available: u64, total: u64, bps: u16) -> MockEscrowReader {
        let mut mock = MockEscrowReader::new();
        mock.expect_available_fees()
            .returning(move |_| Ok(U256::from(available)));
        mock.expect_total_fees_accrued()
            .returning(move || Ok(U256::from(total)));
        mock.expect_fee_bps().returning(move || Ok(bps));
        mock
    }

    #[tokio::test]
    async fn test_report_across_healthy_networks() {
        let rows = collect_fees(
            vec![
                probe("base-sepolia", healthy_reader(42, 100, 250)),
                probe("sepolia", healthy_reader(7, 9, 100)),
            ],
            4,
        )
        .await;

        assert_eq!(rows.len(), 2);
        // Sorted by alias for stable output.
        assert_eq!(rows[0].network, "base-sepolia");
        assert_eq!(rows[0].available.as_deref(), Some("42"));
        assert_eq!(rows[0].total_accrued.as_deref(), Some("100"));
        assert_eq!(rows[0].fee_bps, Some(250));
        assert!(rows[0].error.is_none());
        assert_eq!(rows[1].network, "sepolia");
    }

    #[tokio::test]
    async fn test_one_failing_network_reports_in_place() {
        let mut failing = MockEscrowReader::new();
        failing
            .expect_available_fees()
            .returning(|_| Err(EngineError::TransientChain("rpc timeout".to_string())));

        let rows = collect_fees(
            vec![
                probe("sepolia", healthy_reader(42, 100, 250)),
                probe("base-sepolia", failing),
            ],
            4,
        )
        .await;

        assert_eq!(rows.len(), 2);

        let broken = rows.iter().find(|r| r.network == "base-sepolia").unwrap();
        assert!(broken.available.is_none());
        assert!(broken.error.as_deref().unwrap().contains("rpc timeout"));

        let healthy = rows.iter().find(|r| r.network == "sepolia").unwrap();
        assert_eq!(healthy.available.as_deref(), Some("42"));
        assert!(healthy.error.is_none());
    }
}
