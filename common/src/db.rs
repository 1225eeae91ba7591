use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};

use crate::schema::{FailedAttempt, TransactionStatus};
use crate::store::{MAX_ATTEMPTS, OutcomeStore};

pub struct DatabaseOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub max_attempts: i32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

/// PostgreSQL outcome store. The pool is shared by every caller.
pub struct Database {
    pool: PgPool,
    max_attempts: i32,
}
impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::with_options(database_url, DatabaseOptions::default()).await
    }

    /// Connects and applies the schema. Tables are created only when absent,
    /// so this is safe on every start.
    pub async fn with_options(database_url: &str, opts: DatabaseOptions) -> anyhow::Result<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .context("Failed to create PostgreSQL connect options")?;
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .acquire_timeout(opts.acquire_timeout)
            .connect_with(options)
            .await
            .context("Failed to connect to PostgreSQL")?;
        sqlx::migrate!()
            .run(&pool)
            .await
            .context("Database migration error")?;
        Ok(Self {
            pool,
            max_attempts: opts.max_attempts,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl OutcomeStore for Database {
    async fn record_success(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        checkout_request_id: &str,
    ) -> anyhow::Result<i32> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO transactions (sender, recipient, amount, checkout_request_id, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(sender)
        .bind(recipient)
        .bind(amount)
        .bind(checkout_request_id)
        .bind(TransactionStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert transaction")?;
        log::debug!(
            "Inserted transaction id={} checkout_request_id={}",
            id,
            checkout_request_id
        );
        Ok(id)
    }

    async fn record_failure(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        error: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_transactions (sender, recipient, amount, error, attempts)
            VALUES ($1, $2, $3, $4, 1)
            "#,
        )
        .bind(sender)
        .bind(recipient)
        .bind(amount)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to insert failed transaction")?;

        Ok(())
    }

    async fn list_retryable(&self) -> anyhow::Result<Vec<FailedAttempt>> {
        let rows = sqlx::query_as::<_, FailedAttempt>(
            r#"
            SELECT id, sender, recipient, amount, error, attempts, created_at
            FROM failed_transactions
            WHERE attempts < $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(self.max_attempts)
        .fetch_all(&self.pool)
        .await
        .context("Failed to get retryable failed transactions")?;
        Ok(rows)
    }

    async fn mark_retry_outcome(&self, id: i32, succeeded: bool) -> anyhow::Result<()> {
        let result = if succeeded {
            sqlx::query("DELETE FROM failed_transactions WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .context(format!("Failed to delete failed transaction {}", id))?
        } else {
            sqlx::query("UPDATE failed_transactions SET attempts = attempts + 1 WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .context(format!(
                    "Failed to update attempts for failed transaction {}",
                    id
                ))?
        };
        if result.rows_affected() == 0 {
            anyhow::bail!("Failed transaction {} not found", id);
        }
        Ok(())
    }

    async fn transaction_status(&self, id: i32) -> anyhow::Result<Option<TransactionStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context(format!("Failed to get status of transaction {}", id))?;
        status.map(|s| s.parse()).transpose()
    }

    async fn list_exhausted(&self) -> anyhow::Result<Vec<FailedAttempt>> {
        let rows = sqlx::query_as::<_, FailedAttempt>(
            r#"
            SELECT id, sender, recipient, amount, error, attempts, created_at
            FROM failed_transactions
            WHERE attempts >= $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(self.max_attempts)
        .fetch_all(&self.pool)
        .await
        .context("Failed to get exhausted failed transactions")?;
        Ok(rows)
    }

    fn max_attempts(&self) -> i32 {
        self.max_attempts
    }
}
