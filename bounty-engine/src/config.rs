use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Deployment environment (`development`, `staging`, `production`).
    /// Payouts only execute for bounties created in the same environment.
    pub environment: String,
    pub webhooks: WebhookConfig,
    pub notifications: NotificationConfig,
    pub reconciler: ReconcilerConfig,
    pub networks: Vec<NetworkSettings>,
    pub admin: AdminPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Secret for the `x-hub-signature-256` header of the GitHub event stream.
    pub github_secret: String,
    /// Separate secret for the independently-signed marketplace stream.
    pub marketplace_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Delivery endpoint for contributor/sponsor notifications. When unset,
    /// notifications are logged and dropped.
    pub delivery_url: Option<String>,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    pub background_enabled: bool,
    pub interval_secs: u64,
    /// A bounty reconciled within this window is skipped by the background loop.
    pub debounce_secs: u64,
    pub fanout_limit: usize,
}

/// Raw per-network settings as read from the environment. Validated and
/// turned into a `NetworkConfig` by the registry at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub alias: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub escrow_address: String,
    pub token_address: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub supports_eip1559: bool,
    /// Custodial owner wallet for resolve/refund/withdraw. Optional: reads
    /// work without it, writes on this alias fail with a config error.
    pub owner_private_key: Option<String>,
}

/// Explicit allowlist of privileged external account ids, constructed once
/// at startup and injected into request-handling state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminPolicy {
    ids: HashSet<String>,
}

impl AdminPolicy {
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            ids: ids.into_iter().filter(|id| !id.is_empty()).collect(),
        }
    }

    pub fn is_admin(&self, external_id: &str) -> bool {
        self.ids.contains(external_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let networks = load_networks()?;
        if networks.is_empty() {
            anyhow::bail!("NETWORKS must list at least one enabled network alias");
        }

        Ok(Self {
            server: ServerConfig {
                host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8090".to_string())
                    .parse()
                    .context("SERVER_PORT must be a valid port number")?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("DATABASE_MAX_CONNECTIONS must be an integer")?,
            },
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            webhooks: WebhookConfig {
                github_secret: std::env::var("GITHUB_WEBHOOK_SECRET")
                    .context("GITHUB_WEBHOOK_SECRET is required")?,
                marketplace_secret: std::env::var("MARKETPLACE_WEBHOOK_SECRET")
                    .context("MARKETPLACE_WEBHOOK_SECRET is required")?,
            },
            notifications: NotificationConfig {
                delivery_url: std::env::var("NOTIFICATION_DELIVERY_URL").ok(),
                queue_capacity: std::env::var("NOTIFICATION_QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "256".to_string())
                    .parse()
                    .context("NOTIFICATION_QUEUE_CAPACITY must be an integer")?,
            },
            reconciler: ReconcilerConfig {
                background_enabled: std::env::var("RECONCILER_ENABLED")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
                interval_secs: std::env::var("RECONCILER_INTERVAL_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("RECONCILER_INTERVAL_SECS must be an integer")?,
                debounce_secs: std::env::var("RECONCILER_DEBOUNCE_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("RECONCILER_DEBOUNCE_SECS must be an integer")?,
                fanout_limit: std::env::var("RECONCILER_FANOUT_LIMIT")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()
                    .context("RECONCILER_FANOUT_LIMIT must be an integer")?,
            },
            networks,
            admin: AdminPolicy::new(
                std::env::var("ADMIN_EXTERNAL_IDS")
                    .unwrap_or_default()
                    .split(',')
                    .map(|id| id.trim().to_string()),
            ),
        })
    }
}

fn load_networks() -> Result<Vec<NetworkSettings>> {
    let aliases = std::env::var("NETWORKS").unwrap_or_default();
    let mut networks = Vec::new();

    for alias in aliases.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        networks.push(load_network(alias)?);
    }

    Ok(networks)
}

fn load_network(alias: &str) -> Result<NetworkSettings> {
    let prefix = format!("NETWORK_{}", alias.to_uppercase().replace('-', "_"));
    let var = |suffix: &str| -> Result<String> {
        let name = format!("{prefix}_{suffix}");
        std::env::var(&name).with_context(|| format!("{name} is required for network '{alias}'"))
    };

    Ok(NetworkSettings {
        alias: alias.to_string(),
        chain_id: var("CHAIN_ID")?
            .parse()
            .with_context(|| format!("{prefix}_CHAIN_ID must be an integer"))?,
        rpc_url: var("RPC_URL")?,
        escrow_address: var("ESCROW_ADDRESS")?,
        token_address: var("TOKEN_ADDRESS")?,
        token_symbol: var("TOKEN_SYMBOL")?,
        token_decimals: var("TOKEN_DECIMALS")?
            .parse()
            .with_context(|| format!("{prefix}_TOKEN_DECIMALS must be an integer"))?,
        supports_eip1559: std::env::var(format!("{prefix}_EIP1559"))
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true),
        owner_private_key: std::env::var(format!("{prefix}_OWNER_PRIVATE_KEY")).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_policy() {
        let policy = AdminPolicy::new(vec!["gh-1".to_string(), "gh-2".to_string()]);
        assert!(policy.is_admin("gh-1"));
        assert!(policy.is_admin("gh-2"));
        assert!(!policy.is_admin("gh-3"));
    }

    #[test]
    fn test_admin_policy_ignores_empty_ids() {
        let policy = AdminPolicy::new(vec!["".to_string()]);
        assert!(policy.is_empty());
        assert!(!policy.is_admin(""));
    }
}
