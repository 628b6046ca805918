//! Optional background reconciliation loop.
//!
//! The reconciler normally runs lazily per request; this loop additionally
//! sweeps all open bounties on a fixed interval so divergence surfaces even
//! for sponsors who never load their dashboard. A per-bounty debounce keeps
//! a hot loop from hammering the same ids.

use anyhow::Result;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::ReconcilerConfig;
use crate::models::Bounty;
use crate::network::NetworkRegistry;
use crate::services::reconciler;

pub async fn start(
    pool: PgPool,
    registry: Arc<NetworkRegistry>,
    config: ReconcilerConfig,
) -> Result<()> {
    info!(
        interval_secs = config.interval_secs,
        debounce_secs = config.debounce_secs,
        "background reconciliation worker started"
    );

    let debounce = Duration::from_secs(config.debounce_secs);
    let mut last_seen: HashMap<String, Instant> = HashMap::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));

    loop {
        ticker.tick().await;

        let open = match Bounty::find_open(&pool).await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, "reconciliation sweep could not list open bounties");
                continue;
            }
        };

        let now = Instant::now();
        last_seen.retain(|_, seen| now.duration_since(*seen) < debounce);

        let due: Vec<Bounty> = open
            .into_iter()
            .filter(|b| !last_seen.contains_key(&b.bounty_id))
            .collect();

        if due.is_empty() {
            continue;
        }

        for bounty in &due {
            last_seen.insert(bounty.bounty_id.clone(), now);
        }

        match reconciler::reconcile(&pool, &registry, &due, config.fanout_limit).await {
            Ok(0) => {}
            Ok(updated) => info!(updated, "background sweep reconciled bounties"),
            Err(e) => warn!(error = %e, "background reconciliation sweep failed"),
        }
    }
}
