use std::sync::Arc;
use std::time::Duration;

use common::{ErrorKind, FailedAttempt, OutcomeStore, PaymentGateway};
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Pause between cycles.
    pub interval: Duration,
    /// Pause after a cycle that could not read the failed table at all.
    pub error_interval: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            error_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Failures that used up the last attempt of the budget.
    pub exhausted: usize,
    pub store_errors: usize,
}

/// Background task re-driving failed payments that still have budget left.
pub struct RetryScheduler {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn OutcomeStore>,
    settings: RetrySettings,
}

impl RetryScheduler {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn OutcomeStore>,
        settings: RetrySettings,
    ) -> Self {
        Self {
            gateway,
            store,
            settings,
        }
    }

    /// Runs until `shutdown` flips to true. An entry that is being retried
    /// when shutdown is requested is finished first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Retry scheduler started interval={:?} error_interval={:?} max_attempts={}",
            self.settings.interval,
            self.settings.error_interval,
            self.store.max_attempts()
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.cycle(|| *shutdown.borrow()).await {
                Ok(report) => {
                    if report.attempted > 0 {
                        log::info!(
                            "Retry cycle finished attempted={} resolved={} failed={} exhausted={} store_errors={}",
                            report.attempted,
                            report.resolved,
                            report.failed,
                            report.exhausted,
                            report.store_errors
                        );
                    }
                    self.settings.interval
                }
                Err(e) => {
                    log::error!(
                        "kind={} Error getting failed transactions: {:#}",
                        ErrorKind::TransientInfra,
                        e
                    );
                    self.settings.error_interval
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        log::info!("Retry scheduler stopped");
    }

    /// One pass over the retryable failures. Fails only when the list itself
    /// cannot be read.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        self.cycle(|| false).await
    }

    async fn cycle<F>(&self, should_stop: F) -> anyhow::Result<CycleReport>
    where
        F: Fn() -> bool,
    {
        let entries = self.store.list_retryable().await?;
        let mut report = CycleReport::default();
        for entry in &entries {
            if should_stop() {
                log::info!(
                    "Retry cycle interrupted by shutdown remaining={}",
                    entries.len() - report.attempted
                );
                break;
            }
            self.retry_entry(entry, &mut report).await;
        }
        Ok(report)
    }

    async fn retry_entry(&self, entry: &FailedAttempt, report: &mut CycleReport) {
        report.attempted += 1;
        let response = match self.gateway.initiate(&entry.sender, entry.amount).await {
            Ok(response) => response,
            Err(error) => {
                report.failed += 1;
                log::warn!(
                    "kind={} Retry failed failed_id={} sender={} attempt={}: {}",
                    error.kind(),
                    entry.id,
                    entry.sender,
                    entry.attempts + 1,
                    error
                );
                self.mark_failed(entry, report).await;
                return;
            }
        };

        let checkout_request_id = response.checkout_request_id;
        let transaction_id = match self
            .store
            .record_success(
                &entry.sender,
                &entry.recipient,
                entry.amount,
                &checkout_request_id,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                report.store_errors += 1;
                log::error!(
                    "kind={} Payment retried but not recorded failed_id={} sender={} checkout_request_id={}: {:#}",
                    ErrorKind::TransientInfra,
                    entry.id,
                    entry.sender,
                    checkout_request_id,
                    e
                );
                return;
            }
        };

        match self.store.mark_retry_outcome(entry.id, true).await {
            Ok(()) => {
                report.resolved += 1;
                log::info!(
                    "Retried transaction inserted successfully failed_id={} id={} checkout_request_id={}",
                    entry.id,
                    transaction_id,
                    checkout_request_id
                );
            }
            Err(e) => {
                report.store_errors += 1;
                log::error!(
                    "kind={} Retried transaction id={} recorded but failed_id={} not cleared: {:#}",
                    ErrorKind::TransientInfra,
                    transaction_id,
                    entry.id,
                    e
                );
            }
        }
    }

    async fn mark_failed(&self, entry: &FailedAttempt, report: &mut CycleReport) {
        if let Err(e) = self.store.mark_retry_outcome(entry.id, false).await {
            report.store_errors += 1;
            log::error!(
                "kind={} Failed to update attempts failed_id={}: {:#}",
                ErrorKind::TransientInfra,
                entry.id,
                e
            );
            return;
        }
        let bumped = FailedAttempt {
            attempts: entry.attempts + 1,
            ..entry.clone()
        };
        if bumped.is_exhausted(self.store.max_attempts()) {
            report.exhausted += 1;
            log::error!(
                "kind={} Retry budget exhausted failed_id={} sender={} recipient={} amount={} attempts={}",
                ErrorKind::PermanentExhausted,
                entry.id,
                entry.sender,
                entry.recipient,
                entry.amount,
                bumped.attempts
            );
        }
    }
}
