use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{ErrorKind, GatewayError, OutcomeStore, PaymentGateway, TransactionRequest};
use thiserror::Error;

/// Terminal success of one intake: the payment was initiated and recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub transaction_id: i32,
    pub checkout_request_id: String,
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("gateway call failed: {error}")]
    Gateway {
        #[source]
        error: GatewayError,
        /// Whether a failed attempt row now exists for the retry scheduler.
        recorded: bool,
    },

    #[error("payment {checkout_request_id} was initiated but not recorded: {error:#}")]
    Unrecorded {
        checkout_request_id: String,
        error: anyhow::Error,
    },
}

impl IntakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntakeError::Malformed(_) | IntakeError::Invalid(_) => ErrorKind::PermanentInput,
            IntakeError::Gateway { error, .. } if error.kind() == ErrorKind::PermanentInput => {
                ErrorKind::PermanentInput
            }
            IntakeError::Gateway {
                recorded: true,
                error,
            } => error.kind(),
            IntakeError::Gateway {
                recorded: false, ..
            }
            | IntakeError::Unrecorded { .. } => ErrorKind::TransientInfra,
        }
    }

    /// A retryable gateway failure that left no row behind. Nothing was
    /// initiated, so the message is safe to replay by hand from a dead-letter
    /// queue. It is never handed back to the gateway automatically.
    pub fn is_lost_failure(&self) -> bool {
        matches!(
            self,
            IntakeError::Gateway { recorded: false, error } if error.kind().is_retryable()
        )
    }
}

/// Backoff for store writes made after the gateway call. Only the write is
/// repeated; the gateway call is not.
#[derive(Debug, Clone)]
pub struct StoreWriteBackoff {
    /// Total tries, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for StoreWriteBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl StoreWriteBackoff {
    /// Delay before try `attempt` (0-indexed); doubles up to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Drives one queued request to a recorded outcome.
#[derive(Clone)]
pub struct IntakePipeline {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn OutcomeStore>,
    backoff: StoreWriteBackoff,
}

impl IntakePipeline {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn OutcomeStore>) -> Self {
        Self {
            gateway,
            store,
            backoff: StoreWriteBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: StoreWriteBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn handle(&self, body: &[u8]) -> Result<Recorded, IntakeError> {
        let request = TransactionRequest::from_slice(body)?;
        request.validate().map_err(IntakeError::Invalid)?;
        log::info!(
            "Received transaction sender={} recipient={} amount={}",
            request.sender,
            request.recipient,
            request.amount
        );
        self.process(&request).await
    }

    /// Calls the gateway once and records the result. The gateway is never
    /// called a second time from here, whatever the store does.
    pub async fn process(&self, request: &TransactionRequest) -> Result<Recorded, IntakeError> {
        let error = match self.gateway.initiate(&request.sender, request.amount).await {
            Ok(response) => return self.record_success(request, response.checkout_request_id).await,
            Err(error) => error,
        };

        if error.kind() == ErrorKind::PermanentInput {
            return Err(IntakeError::Gateway {
                error,
                recorded: false,
            });
        }

        log::warn!(
            "kind={} Failed to initiate M-Pesa transaction sender={} amount={}: {}",
            error.kind(),
            request.sender,
            request.amount,
            error
        );
        let message = error.to_string();
        let (store, message) = (&self.store, message.as_str());
        let written = self
            .write_with_backoff("insert failed transaction", move || {
                store.record_failure(&request.sender, &request.recipient, request.amount, message)
            })
            .await;
        let recorded = match written {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "kind={} Failed to insert failed transaction sender={} recipient={} amount={}: {:#}",
                    ErrorKind::TransientInfra,
                    request.sender,
                    request.recipient,
                    request.amount,
                    e
                );
                false
            }
        };
        Err(IntakeError::Gateway { error, recorded })
    }

    async fn record_success(
        &self,
        request: &TransactionRequest,
        checkout_request_id: String,
    ) -> Result<Recorded, IntakeError> {
        let (store, checkout) = (&self.store, checkout_request_id.as_str());
        let written = self
            .write_with_backoff("insert transaction", move || {
                store.record_success(&request.sender, &request.recipient, request.amount, checkout)
            })
            .await;
        match written {
            Ok(transaction_id) => {
                log::info!(
                    "Transaction processed successfully id={} checkout_request_id={}",
                    transaction_id,
                    checkout_request_id
                );
                Ok(Recorded {
                    transaction_id,
                    checkout_request_id,
                })
            }
            Err(error) => {
                log::error!(
                    "kind={} Payment initiated but not recorded sender={} recipient={} amount={} checkout_request_id={}: {:#}",
                    ErrorKind::TransientInfra,
                    request.sender,
                    request.recipient,
                    request.amount,
                    checkout_request_id,
                    error
                );
                Err(IntakeError::Unrecorded {
                    checkout_request_id,
                    error,
                })
            }
        }
    }

    async fn write_with_backoff<T, F, Fut>(&self, what: &str, mut write: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match write().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < max_attempts => {
                    attempt += 1;
                    let delay = self.backoff.delay_for_attempt(attempt);
                    log::warn!(
                        "kind={} Failed to {} try={}/{}, retrying in {:?}: {:#}",
                        ErrorKind::TransientInfra,
                        what,
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
