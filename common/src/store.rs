use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::schema::{FailedAttempt, Transaction, TransactionStatus, check_amount, check_party};

/// Attempts after which a failed request is no longer retried automatically.
pub const MAX_ATTEMPTS: i32 = 3;

/// Durable record of payment outcomes.
///
/// Every operation touches a single row, so the intake pipeline and the retry
/// scheduler can share one store without further coordination: intake only
/// inserts, the scheduler is the only writer of existing failed rows.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Inserts a `pending` transaction and returns its id.
    async fn record_success(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        checkout_request_id: &str,
    ) -> anyhow::Result<i32>;

    /// Inserts a failed attempt with an attempt count of 1.
    async fn record_failure(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        error: &str,
    ) -> anyhow::Result<()>;

    /// Failed attempts still inside the retry budget, oldest first.
    async fn list_retryable(&self) -> anyhow::Result<Vec<FailedAttempt>>;

    /// Deletes the row when `succeeded`, otherwise bumps its attempt count by one.
    async fn mark_retry_outcome(&self, id: i32, succeeded: bool) -> anyhow::Result<()>;

    async fn transaction_status(&self, id: i32) -> anyhow::Result<Option<TransactionStatus>>;

    /// Failed attempts that used up their budget, oldest first.
    async fn list_exhausted(&self) -> anyhow::Result<Vec<FailedAttempt>>;

    fn max_attempts(&self) -> i32;
}

#[derive(Default)]
struct Tables {
    transactions: Vec<Transaction>,
    failed: Vec<FailedAttempt>,
    next_transaction_id: i32,
    next_failed_id: i32,
    unavailable: bool,
    failing_writes: u32,
}

/// Store kept in process memory. Same semantics as [`crate::Database`],
/// column limits included; used by tests and dry runs.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    max_attempts: i32,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: i32) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            max_attempts,
        }
    }

    /// Makes every following operation fail, as if the database went away.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.write().await.unavailable = unavailable;
    }

    /// Makes the next `count` writes fail, then recovers on its own.
    pub async fn fail_next_writes(&self, count: u32) {
        self.tables.write().await.failing_writes = count;
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.tables.read().await.transactions.clone()
    }

    /// All failed attempts, including exhausted ones.
    pub async fn failed_attempts(&self) -> Vec<FailedAttempt> {
        self.tables.read().await.failed.clone()
    }

    fn check(tables: &Tables) -> anyhow::Result<()> {
        if tables.unavailable {
            anyhow::bail!("In-memory store is unavailable");
        }
        Ok(())
    }

    fn check_write(tables: &mut Tables) -> anyhow::Result<()> {
        Self::check(tables)?;
        if tables.failing_writes > 0 {
            tables.failing_writes -= 1;
            anyhow::bail!("In-memory store rejected the write");
        }
        Ok(())
    }

    fn check_columns(sender: &str, recipient: &str, amount: Decimal) -> anyhow::Result<()> {
        check_party("sender", sender).map_err(anyhow::Error::msg)?;
        check_party("recipient", recipient).map_err(anyhow::Error::msg)?;
        check_amount(amount).map_err(anyhow::Error::msg)
    }

    async fn select_failed<F>(&self, keep: F) -> anyhow::Result<Vec<FailedAttempt>>
    where
        F: Fn(&FailedAttempt) -> bool,
    {
        let tables = self.tables.read().await;
        Self::check(&tables)?;
        let mut rows: Vec<FailedAttempt> =
            tables.failed.iter().filter(|f| keep(f)).cloned().collect();
        rows.sort_by_key(|f| (f.created_at, f.id));
        Ok(rows)
    }
}

#[async_trait]
impl OutcomeStore for InMemoryStore {
    async fn record_success(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        checkout_request_id: &str,
    ) -> anyhow::Result<i32> {
        let mut tables = self.tables.write().await;
        Self::check_write(&mut tables)?;
        Self::check_columns(sender, recipient, amount)?;
        tables.next_transaction_id += 1;
        let id = tables.next_transaction_id;
        tables.transactions.push(Transaction {
            id,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount: amount.round_dp(2),
            checkout_request_id: checkout_request_id.to_string(),
            status: TransactionStatus::Pending.to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        });
        Ok(id)
    }

    async fn record_failure(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        error: &str,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        Self::check_write(&mut tables)?;
        Self::check_columns(sender, recipient, amount)?;
        tables.next_failed_id += 1;
        let id = tables.next_failed_id;
        tables.failed.push(FailedAttempt {
            id,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount: amount.round_dp(2),
            error: error.to_string(),
            attempts: 1,
            created_at: chrono::Utc::now().naive_utc(),
        });
        Ok(())
    }

    async fn list_retryable(&self) -> anyhow::Result<Vec<FailedAttempt>> {
        let max_attempts = self.max_attempts;
        self.select_failed(|f| !f.is_exhausted(max_attempts)).await
    }

    async fn mark_retry_outcome(&self, id: i32, succeeded: bool) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        Self::check_write(&mut tables)?;
        let position = tables
            .failed
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| anyhow::anyhow!("Failed transaction {} not found", id))?;
        if succeeded {
            tables.failed.remove(position);
        } else {
            tables.failed[position].attempts += 1;
        }
        Ok(())
    }

    async fn transaction_status(&self, id: i32) -> anyhow::Result<Option<TransactionStatus>> {
        let tables = self.tables.read().await;
        Self::check(&tables)?;
        tables
            .transactions
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status())
            .transpose()
    }

    async fn list_exhausted(&self) -> anyhow::Result<Vec<FailedAttempt>> {
        let max_attempts = self.max_attempts;
        self.select_failed(|f| f.is_exhausted(max_attempts)).await
    }

    fn max_attempts(&self) -> i32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn store_with_failures(count: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        for i in 0..count {
            store
                .record_failure(&format!("2547000000{i:02}"), "merchant-001", dec!(100), "timeout")
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn record_success_inserts_pending_transaction() {
        let store = InMemoryStore::new();
        let id = store
            .record_success("254712345678", "merchant-001", dec!(500.00), "ws_CO_1234")
            .await
            .unwrap();

        let transactions = store.transactions().await;
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].id, id);
        assert_eq!(transactions[0].checkout_request_id, "ws_CO_1234");
        assert_eq!(
            store.transaction_status(id).await.unwrap(),
            Some(TransactionStatus::Pending)
        );
        assert_eq!(store.transaction_status(id + 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_failure_starts_at_one_attempt() {
        let store = store_with_failures(1).await;
        let failed = store.list_retryable().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);
        assert_eq!(failed[0].error, "timeout");
    }

    #[tokio::test]
    async fn retryable_is_oldest_first_and_stable() {
        let store = store_with_failures(3).await;
        let first = store.list_retryable().await.unwrap();
        let second = store.list_retryable().await.unwrap();
        assert_eq!(first, second);
        let ids: Vec<i32> = first.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn capped_rows_move_from_retryable_to_exhausted() {
        let store = store_with_failures(2).await;
        store.mark_retry_outcome(1, false).await.unwrap();
        store.mark_retry_outcome(1, false).await.unwrap();

        let retryable = store.list_retryable().await.unwrap();
        assert!(retryable.iter().all(|f| f.attempts < MAX_ATTEMPTS));
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].id, 2);

        let exhausted = store.list_exhausted().await.unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].attempts, 3);
    }

    #[tokio::test]
    async fn successful_retry_deletes_row() {
        let store = store_with_failures(1).await;
        store.mark_retry_outcome(1, true).await.unwrap();
        assert!(store.list_retryable().await.unwrap().is_empty());
        assert!(store.failed_attempts().await.is_empty());
        assert!(store.mark_retry_outcome(1, false).await.is_err());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = store_with_failures(1).await;
        store.set_unavailable(true).await;
        assert!(store.list_retryable().await.is_err());
        assert!(
            store
                .record_success("a", "b", dec!(1), "ref")
                .await
                .is_err()
        );
        store.set_unavailable(false).await;
        assert_eq!(store.list_retryable().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn writes_beyond_column_limits_fail() {
        let store = InMemoryStore::new();
        let long = "2".repeat(300);
        assert!(
            store
                .record_failure(&long, "merchant-001", dec!(100), "timeout")
                .await
                .is_err()
        );
        assert!(
            store
                .record_success("254712345678", "merchant-001", dec!(1000000000), "ws_CO_1")
                .await
                .is_err()
        );
        assert!(store.transactions().await.is_empty());
        assert!(store.failed_attempts().await.is_empty());
    }

    #[tokio::test]
    async fn failing_writes_recover_after_count() {
        let store = InMemoryStore::new();
        store.fail_next_writes(2).await;
        for _ in 0..2 {
            assert!(
                store
                    .record_failure("254712345678", "merchant-001", dec!(100), "timeout")
                    .await
                    .is_err()
            );
        }
        store
            .record_failure("254712345678", "merchant-001", dec!(100), "timeout")
            .await
            .unwrap();
        assert_eq!(store.failed_attempts().await.len(), 1);
    }
}
