//! Maps verified GitHub events onto bounty lifecycle transitions.

use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::models::{Bounty, PrClaim};
use crate::services::executor::PayoutExecutor;
use crate::services::notifier::{Notification, Notifier};
use crate::webhook::events::{
    extract_issue_refs, GithubEvent, MarketplacePurchaseEvent, PullRequestEvent,
};

#[derive(Debug, Serialize)]
pub struct WebhookSummary {
    pub handled: bool,
    pub detail: String,
}

impl WebhookSummary {
    fn handled(detail: impl Into<String>) -> Self {
        Self {
            handled: true,
            detail: detail.into(),
        }
    }

    fn ignored(detail: impl Into<String>) -> Self {
        Self {
            handled: false,
            detail: detail.into(),
        }
    }
}

pub struct WebhookProcessor {
    pool: PgPool,
    executor: Arc<PayoutExecutor>,
    notifier: Notifier,
}

impl WebhookProcessor {
    pub fn new(pool: PgPool, executor: Arc<PayoutExecutor>, notifier: Notifier) -> Self {
        Self {
            pool,
            executor,
            notifier,
        }
    }

    pub async fn process(&self, event: GithubEvent) -> EngineResult<WebhookSummary> {
        match event {
            GithubEvent::PullRequest(e) => self.process_pull_request(e).await,
            GithubEvent::MarketplacePurchase(e) => self.process_marketplace(e),
            GithubEvent::Unhandled { event } => {
                // Acknowledged and dropped; senders must never see persistent
                // failures for events outside our vocabulary.
                Ok(WebhookSummary::ignored(format!(
                    "event '{event}' is not tracked"
                )))
            }
        }
    }

    async fn process_pull_request(&self, event: PullRequestEvent) -> EngineResult<WebhookSummary> {
        match event.action.as_str() {
            "opened" | "reopened" => self.record_claims(&event).await,
            "closed" if event.pull_request.merged => self.settle_claims(&event).await,
            action => Ok(WebhookSummary::ignored(format!(
                "pull_request action '{action}' is not tracked"
            ))),
        }
    }

    /// PR opened referencing tracked issues: advance claims to `pending`.
    async fn record_claims(&self, event: &PullRequestEvent) -> EngineResult<WebhookSummary> {
        let refs = referenced_issues(&event.pull_request.title, &event.pull_request.body);
        if refs.is_empty() {
            return Ok(WebhookSummary::ignored("PR references no issues"));
        }

        let author = event.pull_request.user.id.to_string();
        let mut claims = 0;

        for issue_number in refs {
            let bounties =
                Bounty::find_open_for_issue(&self.pool, &event.repository.full_name, issue_number)
                    .await?;

            for bounty in bounties {
                let claim = PrClaim::create_or_get(
                    &self.pool,
                    &bounty.bounty_id,
                    event.pull_request.number,
                    &author,
                )
                .await?;

                info!(
                    bounty_id = %bounty.bounty_id,
                    pr_number = event.pull_request.number,
                    claim_id = %claim.id,
                    "claim recorded from PR"
                );

                self.notifier.submit(Notification::ClaimOpened {
                    bounty_id: bounty.bounty_id.clone(),
                    pr_number: event.pull_request.number,
                    author_external_id: author.clone(),
                });
                claims += 1;
            }
        }

        if claims == 0 {
            return Ok(WebhookSummary::ignored(
                "no open bounties for the referenced issues",
            ));
        }

        Ok(WebhookSummary::handled(format!("{claims} claim(s) pending")))
    }

    /// Merged PR referencing funded issues: run the payout executor per
    /// bounty. A failed payout marks the claim `failed` for manual retry;
    /// it is not surfaced to GitHub as a delivery failure.
    async fn settle_claims(&self, event: &PullRequestEvent) -> EngineResult<WebhookSummary> {
        let refs = referenced_issues(&event.pull_request.title, &event.pull_request.body);
        if refs.is_empty() {
            return Ok(WebhookSummary::ignored("PR references no issues"));
        }

        let author = event.pull_request.user.id.to_string();
        let mut paid = 0;
        let mut failed = 0;

        for issue_number in refs {
            let bounties =
                Bounty::find_open_for_issue(&self.pool, &event.repository.full_name, issue_number)
                    .await?;

            for bounty in bounties {
                // Out-of-order delivery: a merge may arrive before (or
                // without) the opened event. Create the claim on demand.
                let claim = PrClaim::create_or_get(
                    &self.pool,
                    &bounty.bounty_id,
                    event.pull_request.number,
                    &author,
                )
                .await?;

                match self.executor.pay_claim(claim.id).await {
                    Ok(receipt) => {
                        info!(
                            bounty_id = %bounty.bounty_id,
                            claim_id = %claim.id,
                            tx_hash = %receipt.tx_hash,
                            "bounty paid out from merged PR"
                        );
                        paid += 1;
                    }
                    Err(e) => {
                        warn!(
                            bounty_id = %bounty.bounty_id,
                            claim_id = %claim.id,
                            error = %e,
                            "payout from merged PR failed; claim left for manual retry"
                        );
                        failed += 1;
                    }
                }
            }
        }

        if paid == 0 && failed == 0 {
            return Ok(WebhookSummary::ignored(
                "no open bounties for the referenced issues",
            ));
        }

        Ok(WebhookSummary::handled(format!(
            "{paid} payout(s) settled, {failed} failed"
        )))
    }

    /// Marketplace plan changes are logged; they never touch bounty state.
    fn process_marketplace(&self, event: MarketplacePurchaseEvent) -> EngineResult<WebhookSummary> {
        info!(
            account = %event.marketplace_purchase.account.login,
            action = %event.action,
            plan = %event.marketplace_purchase.plan.name,
            "marketplace plan change"
        );

        self.notifier.submit(Notification::PlanChanged {
            account_external_id: event.marketplace_purchase.account.id.to_string(),
            action: event.action.clone(),
            plan: event.marketplace_purchase.plan.name.clone(),
        });

        Ok(WebhookSummary::handled(format!(
            "plan change '{}' recorded",
            event.action
        )))
    }
}

fn referenced_issues(title: &Option<String>, body: &Option<String>) -> Vec<i64> {
    let mut text = String::new();
    if let Some(title) = title {
        text.push_str(title);
        text.push('\n');
    }
    if let Some(body) = body {
        text.push_str(body);
    }
    extract_issue_refs(&text)
}
