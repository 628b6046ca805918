//! Network registry: per-alias chain configuration and the pooled escrow
//! adapters built from it. Loaded once at startup, immutable afterwards.

use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::blockchain::EscrowAdapter;
use crate::config::NetworkSettings;
use crate::error::{EngineError, EngineResult};

/// Validated per-alias configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub alias: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub escrow_address: Address,
    pub token_address: Address,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub supports_eip1559: bool,
    pub owner_private_key: Option<String>,
}

impl NetworkConfig {
    fn from_settings(settings: &NetworkSettings) -> EngineResult<Self> {
        if settings.rpc_url.is_empty() {
            return Err(EngineError::Config(format!(
                "network '{}' has an empty RPC URL",
                settings.alias
            )));
        }

        let escrow_address = parse_address(&settings.escrow_address).map_err(|_| {
            EngineError::Config(format!(
                "network '{}' has an invalid escrow address '{}'",
                settings.alias, settings.escrow_address
            ))
        })?;

        let token_address = parse_address(&settings.token_address).map_err(|_| {
            EngineError::Config(format!(
                "network '{}' has an invalid token address '{}'",
                settings.alias, settings.token_address
            ))
        })?;

        if settings.token_decimals > 36 {
            return Err(EngineError::Config(format!(
                "network '{}' declares implausible token decimals {}",
                settings.alias, settings.token_decimals
            )));
        }

        Ok(Self {
            alias: settings.alias.clone(),
            chain_id: settings.chain_id,
            rpc_url: settings.rpc_url.clone(),
            escrow_address,
            token_address,
            token_symbol: settings.token_symbol.clone(),
            token_decimals: settings.token_decimals,
            supports_eip1559: settings.supports_eip1559,
            owner_private_key: settings.owner_private_key.clone(),
        })
    }
}

/// Registry plus client pool: one `EscrowAdapter` per alias, constructed at
/// startup and injected into the components that need chain access.
pub struct NetworkRegistry {
    configs: HashMap<String, NetworkConfig>,
    adapters: HashMap<String, Arc<EscrowAdapter>>,
    aliases: Vec<String>,
}

impl std::fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRegistry")
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl NetworkRegistry {
    /// Build the registry, failing fast on any invalid alias entry.
    pub fn from_settings(settings: &[NetworkSettings]) -> EngineResult<Self> {
        let mut configs = HashMap::new();
        let mut adapters = HashMap::new();
        let mut aliases = Vec::new();

        for entry in settings {
            if configs.contains_key(&entry.alias) {
                return Err(EngineError::Config(format!(
                    "network alias '{}' is configured twice",
                    entry.alias
                )));
            }

            let config = NetworkConfig::from_settings(entry)?;
            let adapter = EscrowAdapter::new(config.clone())?;

            if config.owner_private_key.is_none() {
                warn!(
                    alias = %config.alias,
                    "no owner wallet configured; custodial writes disabled on this network"
                );
            }

            info!(
                alias = %config.alias,
                chain_id = config.chain_id,
                escrow = ?config.escrow_address,
                eip1559 = config.supports_eip1559,
                "registered network"
            );

            aliases.push(config.alias.clone());
            adapters.insert(config.alias.clone(), Arc::new(adapter));
            configs.insert(config.alias.clone(), config);
        }

        aliases.sort();

        Ok(Self {
            configs,
            adapters,
            aliases,
        })
    }

    /// Resolve an alias or fail with a user-facing error that enumerates the
    /// valid aliases (aliases arrive from request bodies and cookies).
    pub fn resolve(&self, alias: &str) -> EngineResult<&NetworkConfig> {
        self.configs
            .get(alias)
            .ok_or_else(|| EngineError::InvalidNetwork {
                alias: alias.to_string(),
                valid: self.aliases.clone(),
            })
    }

    pub fn adapter(&self, alias: &str) -> EngineResult<Arc<EscrowAdapter>> {
        self.adapters
            .get(alias)
            .cloned()
            .ok_or_else(|| EngineError::InvalidNetwork {
                alias: alias.to_string(),
                valid: self.aliases.clone(),
            })
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn iter_adapters(&self) -> impl Iterator<Item = (&NetworkConfig, Arc<EscrowAdapter>)> {
        self.aliases.iter().map(|alias| {
            (
                &self.configs[alias],
                self.adapters[alias].clone(),
            )
        })
    }

    /// Best-effort startup check that each RPC serves its configured chain.
    /// Failures are logged, not fatal: an unreachable RPC at boot must not
    /// keep the other networks down.
    pub async fn verify_chain_ids(&self) {
        for (config, adapter) in self.iter_adapters() {
            match adapter.verify_chain_id().await {
                Ok(()) => {}
                Err(EngineError::Config(msg)) => {
                    warn!(alias = %config.alias, "{msg}");
                }
                Err(e) => {
                    warn!(alias = %config.alias, error = %e, "could not verify chain id at startup");
                }
            }
        }
    }
}

fn parse_address(raw: &str) -> Result<Address, ()> {
    raw.parse::<Address>().map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(alias: &str) -> NetworkSettings {
        NetworkSettings {
            alias: alias.to_string(),
            chain_id: 11155111,
            rpc_url: "http://localhost:8545".to_string(),
            escrow_address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string(),
            token_address: "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238".to_string(),
            token_symbol: "USDC".to_string(),
            token_decimals: 6,
            supports_eip1559: true,
            owner_private_key: None,
        }
    }

    #[test]
    fn test_resolve_known_alias() {
        let registry = NetworkRegistry::from_settings(&[settings("sepolia")]).unwrap();
        let config = registry.resolve("sepolia").unwrap();
        assert_eq!(config.chain_id, 11155111);
        assert_eq!(config.token_symbol, "USDC");
    }

    #[test]
    fn test_unknown_alias_lists_valid_ones() {
        let registry =
            NetworkRegistry::from_settings(&[settings("sepolia"), settings("base-sepolia")])
                .unwrap();

        let err = registry.resolve("mainnet").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid network alias"));
        assert!(msg.contains("mainnet"));
        assert!(msg.contains("sepolia"));
        assert!(msg.contains("base-sepolia"));
    }

    #[test]
    fn test_invalid_escrow_address_fails_fast() {
        let mut bad = settings("sepolia");
        bad.escrow_address = "not-an-address".to_string();

        let err = NetworkRegistry::from_settings(&[bad]).unwrap_err();
        assert!(err.to_string().contains("invalid escrow address"));
    }

    #[test]
    fn test_duplicate_alias_fails_fast() {
        let err =
            NetworkRegistry::from_settings(&[settings("sepolia"), settings("sepolia")])
                .unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn test_empty_rpc_url_fails_fast() {
        let mut bad = settings("sepolia");
        bad.rpc_url = String::new();

        assert!(NetworkRegistry::from_settings(&[bad]).is_err());
    }

    #[test]
    fn test_aliases_sorted() {
        let registry =
            NetworkRegistry::from_settings(&[settings("zeta"), settings("alpha")]).unwrap();
        assert_eq!(registry.aliases(), &["alpha".to_string(), "zeta".to_string()]);
    }
}
