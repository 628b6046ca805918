//! Fire-and-forget notification submission.
//!
//! Lifecycle events (claim opened, payout settled, refund processed) go to
//! an email/Discord delivery collaborator. Delivery is best-effort and never
//! blocks or rolls back a financial transition: submissions land on a
//! bounded queue, a single worker drains it, and failures are logged.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    ClaimOpened {
        bounty_id: String,
        pr_number: i64,
        author_external_id: String,
    },
    PayoutSucceeded {
        bounty_id: String,
        claim_id: Uuid,
        tx_hash: String,
    },
    PayoutFailed {
        bounty_id: String,
        claim_id: Uuid,
        reason: String,
    },
    RefundProcessed {
        bounty_id: String,
        tx_hash: String,
    },
    PlanChanged {
        account_external_id: String,
        action: String,
        plan: String,
    },
}

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Start the delivery worker and return the submission handle.
    pub fn start(config: NotificationConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(deliver_loop(rx, config));
        Self { tx }
    }

    /// A handle whose queue is drained by the given receiver; lets tests
    /// observe submissions without a worker.
    #[cfg(test)]
    pub fn for_test(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Submit without blocking. A full queue drops the notification with a
    /// warning; notification loss must never stall money movement.
    pub fn submit(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            warn!(error = %e, "notification dropped");
        }
    }
}

async fn deliver_loop(mut rx: mpsc::Receiver<Notification>, config: NotificationConfig) {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent("MergePay-Notifier/1.0")
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    while let Some(notification) = rx.recv().await {
        match &config.delivery_url {
            Some(url) => {
                let result = client.post(url).json(&notification).send().await;
                match result {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        warn!(status = %response.status(), "notification delivery rejected");
                    }
                    Err(e) => {
                        warn!(error = %e, "notification delivery failed");
                    }
                }
            }
            None => {
                info!(notification = ?notification, "notification (no delivery endpoint configured)");
            }
        }
    }
}
