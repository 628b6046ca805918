use async_trait::async_trait;
use ethers::contract::{ContractCall, ContractError};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionReceipt, H256, U256, U64};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::blockchain::contracts::BountyEscrow;
use crate::error::{EngineError, EngineResult};
use crate::network::NetworkConfig;

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Settlement status as stored by the escrow contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnChainStatus {
    None,
    Open,
    Resolved,
    Refunded,
}

impl OnChainStatus {
    pub fn from_u8(raw: u8) -> EngineResult<Self> {
        match raw {
            0 => Ok(OnChainStatus::None),
            1 => Ok(OnChainStatus::Open),
            2 => Ok(OnChainStatus::Resolved),
            3 => Ok(OnChainStatus::Refunded),
            other => Err(EngineError::Internal(format!(
                "escrow contract returned unknown status {other}"
            ))),
        }
    }
}

/// `getBounty` result, decoded.
#[derive(Debug, Clone)]
pub struct OnChainBounty {
    pub repo_id_hash: [u8; 32],
    pub sponsor: Address,
    pub resolver: Address,
    pub amount: U256,
    pub deadline: U256,
    pub issue_number: U256,
    pub status: OnChainStatus,
}

/// Result of a write against the escrow. Expected failure modes (reverts,
/// unfunded owner wallet) come back as `success: false` with a readable
/// message; only transport errors cross the adapter boundary as `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutcome {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
}

impl TxOutcome {
    pub fn confirmed(tx_hash: H256, block_number: Option<U64>) -> Self {
        Self {
            success: true,
            tx_hash: Some(format!("{tx_hash:#x}")),
            block_number: block_number.map(|b| b.as_u64()),
            error: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hash: None,
            block_number: None,
            error: Some(message.into()),
        }
    }

    pub fn reverted_on_chain(tx_hash: H256) -> Self {
        Self {
            success: false,
            tx_hash: Some(format!("{tx_hash:#x}")),
            block_number: None,
            error: Some("transaction reverted on-chain".to_string()),
        }
    }
}

/// Read surface of the escrow, factored out so the reconciler, fee ledger
/// and executor can be exercised against mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EscrowReader: Send + Sync {
    async fn get_bounty(&self, bounty_id: [u8; 32]) -> EngineResult<OnChainBounty>;
    async fn available_fees(&self, token: Address) -> EngineResult<U256>;
    async fn total_fees_accrued(&self) -> EngineResult<U256>;
    async fn fee_bps(&self) -> EngineResult<u16>;
    async fn owner(&self) -> EngineResult<Address>;
}

/// Typed wrapper over one network's escrow contract.
pub struct EscrowAdapter {
    config: NetworkConfig,
    provider: Provider<Http>,
    reader: BountyEscrow<Provider<Http>>,
    wallet: Option<LocalWallet>,
}

impl EscrowAdapter {
    pub fn new(config: NetworkConfig) -> EngineResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| {
            EngineError::Config(format!(
                "invalid RPC URL for network '{}': {e}",
                config.alias
            ))
        })?;

        let wallet = match &config.owner_private_key {
            Some(key) => Some(
                key.parse::<LocalWallet>()
                    .map_err(|_| {
                        EngineError::Config(format!(
                            "owner private key for network '{}' is not a valid secp256k1 key",
                            config.alias
                        ))
                    })?
                    .with_chain_id(config.chain_id),
            ),
            None => None,
        };

        let reader = BountyEscrow::new(config.escrow_address, Arc::new(provider.clone()));

        Ok(Self {
            config,
            provider,
            reader,
            wallet,
        })
    }

    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Address of the custodial owner wallet, when one is configured.
    pub fn signer_address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|w| w.address())
    }

    /// Verify the RPC endpoint actually serves the configured chain id.
    pub async fn verify_chain_id(&self) -> EngineResult<()> {
        let chain_id = self
            .provider
            .get_chainid()
            .await
            .map_err(EngineError::transient)?;

        if chain_id.as_u64() != self.config.chain_id {
            return Err(EngineError::Config(format!(
                "network '{}': RPC reports chain id {} but configuration says {}",
                self.config.alias, chain_id, self.config.chain_id
            )));
        }

        Ok(())
    }

    pub async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> EngineResult<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(EngineError::transient)
    }

    /// Pay the bounty out to `to`. One confirmation is awaited before the
    /// outcome is returned.
    pub async fn resolve(&self, bounty_id: [u8; 32], to: Address) -> EngineResult<TxOutcome> {
        let contract = self.signer_contract()?;
        let call = self.priced(contract.resolve_bounty(bounty_id, to)).await?;

        info!(
            network = %self.config.alias,
            bounty_id = %hex::encode(bounty_id),
            to = ?to,
            "submitting resolveBounty"
        );
        self.submit(call).await
    }

    /// Refund an expired bounty back to its sponsor.
    pub async fn refund_expired(&self, bounty_id: [u8; 32]) -> EngineResult<TxOutcome> {
        let contract = self.signer_contract()?;
        let call = self.priced(contract.refund_expired(bounty_id)).await?;

        info!(
            network = %self.config.alias,
            bounty_id = %hex::encode(bounty_id),
            "submitting refundExpired"
        );
        self.submit(call).await
    }

    /// Withdraw accrued protocol fees to `treasury`.
    pub async fn withdraw_fees(
        &self,
        token: Address,
        treasury: Address,
        amount: U256,
    ) -> EngineResult<TxOutcome> {
        let contract = self.signer_contract()?;
        let call = self
            .priced(contract.withdraw_fees(token, treasury, amount))
            .await?;

        info!(
            network = %self.config.alias,
            token = ?token,
            treasury = ?treasury,
            %amount,
            "submitting withdrawFees"
        );
        self.submit(call).await
    }

    fn signer_contract(&self) -> EngineResult<BountyEscrow<SignerClient>> {
        let wallet = self.wallet.clone().ok_or_else(|| {
            EngineError::Config(format!(
                "no owner wallet configured for network '{}'; set NETWORK_{}_OWNER_PRIVATE_KEY to enable custodial writes",
                self.config.alias,
                self.config.alias.to_uppercase().replace('-', "_")
            ))
        })?;

        let client = SignerMiddleware::new(self.provider.clone(), wallet);
        Ok(BountyEscrow::new(
            self.config.escrow_address,
            Arc::new(client),
        ))
    }

    /// Chains without EIP-1559 support get an explicit legacy gas price
    /// fetched from the chain's fee estimation RPC.
    async fn priced(
        &self,
        call: ContractCall<SignerClient, ()>,
    ) -> EngineResult<ContractCall<SignerClient, ()>> {
        if self.config.supports_eip1559 {
            return Ok(call);
        }

        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(EngineError::transient)?;

        Ok(call.legacy().gas_price(gas_price))
    }

    async fn submit(&self, call: ContractCall<SignerClient, ()>) -> EngineResult<TxOutcome> {
        let pending = match call.send().await {
            Ok(pending) => pending,
            Err(e) => return classify_send_error(e),
        };

        let tx_hash = *pending;
        let receipt = pending
            .confirmations(1)
            .await
            .map_err(EngineError::transient)?;

        match receipt {
            Some(receipt) if receipt.status == Some(U64::from(1)) => {
                info!(tx_hash = %format!("{tx_hash:#x}"), "transaction confirmed");
                Ok(TxOutcome::confirmed(tx_hash, receipt.block_number))
            }
            Some(_) => Ok(TxOutcome::reverted_on_chain(tx_hash)),
            None => Err(EngineError::TransientChain(
                "transaction dropped from the mempool before confirmation".to_string(),
            )),
        }
    }
}

#[async_trait]
impl EscrowReader for EscrowAdapter {
    async fn get_bounty(&self, bounty_id: [u8; 32]) -> EngineResult<OnChainBounty> {
        let (repo_id_hash, sponsor, resolver, amount, deadline, issue_number, status) = self
            .reader
            .get_bounty(bounty_id)
            .call()
            .await
            .map_err(classify_read_error)?;

        Ok(OnChainBounty {
            repo_id_hash,
            sponsor,
            resolver,
            amount,
            deadline,
            issue_number,
            status: OnChainStatus::from_u8(status)?,
        })
    }

    async fn available_fees(&self, token: Address) -> EngineResult<U256> {
        self.reader
            .available_fees(token)
            .call()
            .await
            .map_err(classify_read_error)
    }

    async fn total_fees_accrued(&self) -> EngineResult<U256> {
        self.reader
            .total_fees_accrued()
            .call()
            .await
            .map_err(classify_read_error)
    }

    async fn fee_bps(&self) -> EngineResult<u16> {
        self.reader
            .fee_bps()
            .call()
            .await
            .map_err(classify_read_error)
    }

    async fn owner(&self) -> EngineResult<Address> {
        self.reader.owner().call().await.map_err(classify_read_error)
    }
}

/// Expected send failures become `TxOutcome { success: false }`; transport
/// errors stay errors.
fn classify_send_error<M: Middleware>(e: ContractError<M>) -> EngineResult<TxOutcome> {
    if let Some(reason) = e.decode_revert::<String>() {
        return Ok(TxOutcome::rejected(map_revert(&reason)));
    }
    if e.is_revert() {
        return Ok(TxOutcome::rejected("execution reverted"));
    }

    let message = e.to_string();
    if message.contains("insufficient funds") {
        return Ok(TxOutcome::rejected(
            "owner wallet has insufficient funds for gas",
        ));
    }

    Err(EngineError::TransientChain(message))
}

fn classify_read_error<M: Middleware>(e: ContractError<M>) -> EngineError {
    if let Some(reason) = e.decode_revert::<String>() {
        return EngineError::ContractRevert(map_revert(&reason));
    }
    if e.is_revert() {
        return EngineError::ContractRevert("execution reverted".to_string());
    }
    EngineError::TransientChain(e.to_string())
}

/// Map raw escrow revert strings to user-readable messages.
fn map_revert(reason: &str) -> String {
    match reason {
        "NotExpired" | "DeadlineNotPassed" => {
            "bounty deadline has not passed yet".to_string()
        }
        "AlreadyResolved" => "bounty was already resolved on-chain".to_string(),
        "AlreadyRefunded" => "bounty was already refunded on-chain".to_string(),
        "UnknownBounty" | "BountyNotFound" => {
            "no bounty exists on-chain for this id".to_string()
        }
        "InsufficientFees" => "requested amount exceeds available fees".to_string(),
        "ZeroAddress" => "payout address must not be the zero address".to_string(),
        "NotOwner" | "Unauthorized" | "Ownable: caller is not the owner" => {
            "acting wallet is not the escrow contract owner".to_string()
        }
        other => format!("escrow contract rejected the call: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_chain_status_mapping() {
        assert_eq!(OnChainStatus::from_u8(0).unwrap(), OnChainStatus::None);
        assert_eq!(OnChainStatus::from_u8(1).unwrap(), OnChainStatus::Open);
        assert_eq!(OnChainStatus::from_u8(2).unwrap(), OnChainStatus::Resolved);
        assert_eq!(OnChainStatus::from_u8(3).unwrap(), OnChainStatus::Refunded);
        assert!(OnChainStatus::from_u8(4).is_err());
    }

    #[test]
    fn test_revert_mapping() {
        assert_eq!(map_revert("NotExpired"), "bounty deadline has not passed yet");
        assert_eq!(
            map_revert("Ownable: caller is not the owner"),
            "acting wallet is not the escrow contract owner"
        );
        assert!(map_revert("SomethingElse").contains("SomethingElse"));
    }

    #[test]
    fn test_outcome_constructors() {
        let hash = H256::repeat_byte(0xab);
        let ok = TxOutcome::confirmed(hash, Some(U64::from(17)));
        assert!(ok.success);
        assert_eq!(ok.block_number, Some(17));
        assert_eq!(ok.tx_hash.as_deref(), Some(&format!("{hash:#x}")[..]));

        let bad = TxOutcome::rejected("nope");
        assert!(!bad.success);
        assert!(bad.tx_hash.is_none());
        assert_eq!(bad.error.as_deref(), Some("nope"));
    }
}
