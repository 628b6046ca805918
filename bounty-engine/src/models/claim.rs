use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// A pull request attempting to close a bounty's issue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PrClaim {
    pub id: Uuid,
    pub bounty_id: String,
    pub pr_number: i64,
    pub pr_author_external_id: String,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Paid,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Paid => "paid",
            ClaimStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "paid" => Ok(ClaimStatus::Paid),
            "failed" => Ok(ClaimStatus::Failed),
            other => Err(EngineError::Internal(format!(
                "unknown claim status '{other}' in database"
            ))),
        }
    }

    /// A claim can be (re-)submitted for payout from these states.
    pub fn is_payable(&self) -> bool {
        matches!(self, ClaimStatus::Pending | ClaimStatus::Failed)
    }
}

impl PrClaim {
    pub fn parsed_status(&self) -> EngineResult<ClaimStatus> {
        ClaimStatus::parse(&self.status)
    }

    /// Create a pending claim, or return the existing one for the same
    /// (bounty, PR) pair. Duplicate webhook deliveries land here.
    pub async fn create_or_get(
        pool: &PgPool,
        bounty_id: &str,
        pr_number: i64,
        pr_author_external_id: &str,
    ) -> Result<PrClaim, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO pr_claims (id, bounty_id, pr_number, pr_author_external_id, status, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            ON CONFLICT (bounty_id, pr_number) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bounty_id)
        .bind(pr_number)
        .bind(pr_author_external_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        sqlx::query_as::<_, PrClaim>(
            "SELECT * FROM pr_claims WHERE bounty_id = $1 AND pr_number = $2",
        )
        .bind(bounty_id)
        .bind(pr_number)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<PrClaim>, sqlx::Error> {
        sqlx::query_as::<_, PrClaim>("SELECT * FROM pr_claims WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_bounty(
        pool: &PgPool,
        bounty_id: &str,
    ) -> Result<Vec<PrClaim>, sqlx::Error> {
        sqlx::query_as::<_, PrClaim>(
            "SELECT * FROM pr_claims WHERE bounty_id = $1 ORDER BY created_at ASC",
        )
        .bind(bounty_id)
        .fetch_all(pool)
        .await
    }

    /// True if some claim already reached `paid` for this bounty.
    pub async fn paid_exists(pool: &PgPool, bounty_id: &str) -> Result<bool, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pr_claims WHERE bounty_id = $1 AND status = 'paid'",
        )
        .bind(bounty_id)
        .fetch_one(pool)
        .await?;

        Ok(row.0 > 0)
    }

    /// Record a successful payout. Guarded on not-already-paid; the partial
    /// unique index on (bounty_id) WHERE status = 'paid' backs the
    /// at-most-one-payout invariant at the storage layer.
    pub async fn mark_paid(
        pool: &PgPool,
        id: Uuid,
        tx_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE pr_claims
            SET status = 'paid', tx_hash = $2, resolved_at = $3, error_message = NULL
            WHERE id = $1 AND status <> 'paid'
            "#,
        )
        .bind(id)
        .bind(tx_hash)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failed payout attempt with the adapter's error message so a
    /// caller-initiated retry has context.
    pub async fn mark_failed(
        pool: &PgPool,
        id: Uuid,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE pr_claims
            SET status = 'failed', error_message = $2
            WHERE id = $1 AND status <> 'paid'
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_status_mapping() {
        assert_eq!(ClaimStatus::parse("pending").unwrap(), ClaimStatus::Pending);
        assert_eq!(ClaimStatus::parse("paid").unwrap(), ClaimStatus::Paid);
        assert_eq!(ClaimStatus::parse("failed").unwrap(), ClaimStatus::Failed);
        assert!(ClaimStatus::parse("unknown").is_err());
    }

    #[test]
    fn test_payable_states() {
        assert!(ClaimStatus::Pending.is_payable());
        assert!(ClaimStatus::Failed.is_payable());
        assert!(!ClaimStatus::Paid.is_payable());
    }
}
