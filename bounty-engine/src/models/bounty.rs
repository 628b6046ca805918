use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{EngineError, EngineResult};

const SECONDS_PER_DAY: i64 = 86_400;

/// A funded bounty row. `bounty_id` is the 0x-prefixed lowercase hex of the
/// on-chain identifier and is globally unique across networks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bounty {
    pub bounty_id: String,
    pub repo_full_name: String,
    pub repo_id: i64,
    pub issue_number: i64,
    pub sponsor_address: String,
    pub sponsor_external_id: String,
    pub token: String,
    pub token_symbol: String,
    pub token_decimals: i32,
    pub amount: Decimal,
    /// Unix seconds.
    pub deadline: i64,
    pub status: String,
    pub tx_hash: Option<String>,
    pub network: String,
    pub chain_id: i64,
    pub environment: String,
    pub pinned_comment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored status. `expired` is intentionally absent: it is derived from the
/// deadline and only becomes a stored fact when a refund lands on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BountyStatus {
    Open,
    Resolved,
    Refunded,
    Canceled,
}

impl BountyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BountyStatus::Open => "open",
            BountyStatus::Resolved => "resolved",
            BountyStatus::Refunded => "refunded",
            BountyStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "open" => Ok(BountyStatus::Open),
            "resolved" => Ok(BountyStatus::Resolved),
            "refunded" => Ok(BountyStatus::Refunded),
            "canceled" => Ok(BountyStatus::Canceled),
            other => Err(EngineError::Internal(format!(
                "unknown bounty status '{other}' in database"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BountyStatus::Open)
    }
}

/// Derived lifecycle view returned to clients; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Open,
    Expired,
    Resolved,
    Refunded,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    pub state: LifecycleState,
    pub days_remaining: i64,
    pub is_expired: bool,
    pub refund_eligible: bool,
}

impl Bounty {
    pub fn parsed_status(&self) -> EngineResult<BountyStatus> {
        BountyStatus::parse(&self.status)
    }

    /// Compute the derived lifecycle at `now` (unix seconds). An open bounty
    /// past its deadline derives as expired without any DB write.
    pub fn lifecycle(&self, now: i64) -> EngineResult<Lifecycle> {
        let status = self.parsed_status()?;
        let expired = status == BountyStatus::Open && self.deadline <= now;

        let state = match status {
            BountyStatus::Open if expired => LifecycleState::Expired,
            BountyStatus::Open => LifecycleState::Open,
            BountyStatus::Resolved => LifecycleState::Resolved,
            BountyStatus::Refunded => LifecycleState::Refunded,
            BountyStatus::Canceled => LifecycleState::Canceled,
        };

        let days_remaining = if status == BountyStatus::Open && self.deadline > now {
            (self.deadline - now) / SECONDS_PER_DAY
        } else {
            0
        };

        Ok(Lifecycle {
            state,
            days_remaining,
            is_expired: expired,
            refund_eligible: expired,
        })
    }

    /// True iff the bounty is stored `open` and the deadline has passed.
    /// Terminal statuses are never refund-eligible regardless of deadline.
    pub fn is_refund_eligible(&self, now: i64) -> bool {
        matches!(self.parsed_status(), Ok(BountyStatus::Open)) && self.deadline <= now
    }

    pub async fn create(pool: &PgPool, bounty: &Bounty) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO bounties (
                bounty_id, repo_full_name, repo_id, issue_number, sponsor_address,
                sponsor_external_id, token, token_symbol, token_decimals, amount,
                deadline, status, tx_hash, network, chain_id, environment,
                pinned_comment_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (bounty_id) DO NOTHING
            "#,
        )
        .bind(&bounty.bounty_id)
        .bind(&bounty.repo_full_name)
        .bind(bounty.repo_id)
        .bind(bounty.issue_number)
        .bind(&bounty.sponsor_address)
        .bind(&bounty.sponsor_external_id)
        .bind(&bounty.token)
        .bind(&bounty.token_symbol)
        .bind(bounty.token_decimals)
        .bind(bounty.amount)
        .bind(bounty.deadline)
        .bind(&bounty.status)
        .bind(&bounty.tx_hash)
        .bind(&bounty.network)
        .bind(bounty.chain_id)
        .bind(&bounty.environment)
        .bind(bounty.pinned_comment_id)
        .bind(bounty.created_at)
        .bind(bounty.updated_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find_by_id(pool: &PgPool, bounty_id: &str) -> Result<Option<Bounty>, sqlx::Error> {
        sqlx::query_as::<_, Bounty>("SELECT * FROM bounties WHERE bounty_id = $1")
            .bind(bounty_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_sponsor(
        pool: &PgPool,
        sponsor_external_id: &str,
    ) -> Result<Vec<Bounty>, sqlx::Error> {
        sqlx::query_as::<_, Bounty>(
            "SELECT * FROM bounties WHERE sponsor_external_id = $1 ORDER BY created_at DESC",
        )
        .bind(sponsor_external_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_open(pool: &PgPool) -> Result<Vec<Bounty>, sqlx::Error> {
        sqlx::query_as::<_, Bounty>(
            "SELECT * FROM bounties WHERE status = 'open' ORDER BY created_at ASC",
        )
        .fetch_all(pool)
        .await
    }

    /// Find open bounties for an issue in a repository (webhook path).
    pub async fn find_open_for_issue(
        pool: &PgPool,
        repo_full_name: &str,
        issue_number: i64,
    ) -> Result<Vec<Bounty>, sqlx::Error> {
        sqlx::query_as::<_, Bounty>(
            r#"
            SELECT * FROM bounties
            WHERE repo_full_name = $1 AND issue_number = $2 AND status = 'open'
            ORDER BY created_at ASC
            "#,
        )
        .bind(repo_full_name)
        .bind(issue_number)
        .fetch_all(pool)
        .await
    }

    /// Transition an `open` bounty to a terminal status. The guard on the
    /// stored status makes the transition idempotent: a second writer finds
    /// zero rows and reports false.
    pub async fn settle(
        pool: &PgPool,
        bounty_id: &str,
        status: BountyStatus,
        tx_hash: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE bounties
            SET status = $2, tx_hash = COALESCE($3, tx_hash), updated_at = $4
            WHERE bounty_id = $1 AND status = 'open'
            "#,
        )
        .bind(bounty_id)
        .bind(status.as_str())
        .bind(tx_hash)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
