use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Optional per-bounty payout restriction. An empty set means any address
/// may claim; membership is managed by the bounty's sponsor only (enforced
/// at the handler layer).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AllowlistEntry {
    pub id: Uuid,
    pub bounty_id: String,
    pub allowed_address: String,
    pub created_at: DateTime<Utc>,
}

impl AllowlistEntry {
    pub async fn add(
        pool: &PgPool,
        bounty_id: &str,
        address: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO allowlist (id, bounty_id, allowed_address, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (bounty_id, allowed_address) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bounty_id)
        .bind(address.to_lowercase())
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn remove(
        pool: &PgPool,
        bounty_id: &str,
        address: &str,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM allowlist WHERE bounty_id = $1 AND allowed_address = $2")
                .bind(bounty_id)
                .bind(address.to_lowercase())
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_bounty(
        pool: &PgPool,
        bounty_id: &str,
    ) -> Result<Vec<AllowlistEntry>, sqlx::Error> {
        sqlx::query_as::<_, AllowlistEntry>(
            "SELECT * FROM allowlist WHERE bounty_id = $1 ORDER BY created_at ASC",
        )
        .bind(bounty_id)
        .fetch_all(pool)
        .await
    }

    /// Empty allowlist permits everyone; otherwise the address must be listed.
    pub async fn permits(
        pool: &PgPool,
        bounty_id: &str,
        address: &str,
    ) -> Result<bool, sqlx::Error> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM allowlist WHERE bounty_id = $1")
                .bind(bounty_id)
                .fetch_one(pool)
                .await?;

        if total.0 == 0 {
            return Ok(true);
        }

        let matched: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM allowlist WHERE bounty_id = $1 AND allowed_address = $2",
        )
        .bind(bounty_id)
        .bind(address.to_lowercase())
        .fetch_one(pool)
        .await?;

        Ok(matched.0 > 0)
    }
}
