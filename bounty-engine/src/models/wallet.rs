use async_trait::async_trait;
use ethers::types::Address;
use sqlx::PgPool;

use crate::error::{EngineError, EngineResult};

/// Read-only view of the contributor payout-wallet directory. The mapping is
/// owned by the profile service; this engine only resolves external account
/// ids to payout addresses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletDirectory: Send + Sync {
    async fn payout_address(&self, external_id: &str) -> EngineResult<Option<Address>>;
}

pub struct PgWalletDirectory {
    pool: PgPool,
}

impl PgWalletDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletDirectory for PgWalletDirectory {
    async fn payout_address(&self, external_id: &str) -> EngineResult<Option<Address>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT address FROM wallet_links WHERE external_id = $1")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((address,)) => address
                .parse::<Address>()
                .map(Some)
                .map_err(|_| {
                    EngineError::Internal(format!(
                        "wallet link for '{external_id}' holds an invalid address"
                    ))
                }),
            None => Ok(None),
        }
    }
}
