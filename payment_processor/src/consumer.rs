use anyhow::Context;
use common::{ErrorKind, RequestQueue};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions},
    types::FieldTable,
};
use tokio::sync::watch;
use tokio_stream::StreamExt;

use crate::intake::{IntakeError, IntakePipeline, Recorded};

const CONSUMER_TAG: &str = "payment_processor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Rejected without requeue, so the broker dead-letters it when the queue
    /// has a dead-letter exchange and drops it otherwise.
    DeadLetter,
}

/// No delivery is ever handed back to the queue: a redelivery would reach the
/// gateway again outside the retry budget.
pub fn disposition(outcome: &Result<Recorded, IntakeError>) -> Disposition {
    match outcome {
        Err(e) if e.is_lost_failure() => Disposition::DeadLetter,
        _ => Disposition::Ack,
    }
}

/// Feeds queue deliveries through the pipeline one at a time until shutdown
/// or until the broker closes the consumer.
pub async fn consume(
    queue: &RequestQueue,
    pipeline: &IntakePipeline,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    queue.set_prefetch(1).await?;
    let mut consumer = queue
        .channel()
        .basic_consume(
            queue.name(),
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to register a consumer")?;

    log::info!(" [*] Waiting for messages queue={}", queue.name());

    loop {
        let delivery = tokio::select! {
            next = consumer.next() => match next {
                Some(delivery) => delivery.context("Failed to receive delivery")?,
                None => anyhow::bail!("Consumer stream for `{}` closed by broker", queue.name()),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        handle_delivery(pipeline, delivery).await?;
    }

    log::info!("Stopped consuming queue={}", queue.name());
    Ok(())
}

async fn handle_delivery(pipeline: &IntakePipeline, delivery: Delivery) -> anyhow::Result<()> {
    log::debug!(
        "Received a message delivery_tag={} bytes={}",
        delivery.delivery_tag,
        delivery.data.len()
    );
    let outcome = pipeline.handle(&delivery.data).await;

    if let Err(e) = &outcome {
        match e.kind() {
            ErrorKind::PermanentInput => log::warn!(
                "kind={} Dropping message delivery_tag={}: {}",
                e.kind(),
                delivery.delivery_tag,
                e
            ),
            kind => log::error!(
                "kind={} Error processing message delivery_tag={}: {}",
                kind,
                delivery.delivery_tag,
                e
            ),
        }
    }

    match disposition(&outcome) {
        Disposition::Ack => {
            delivery
                .acker
                .ack(BasicAckOptions::default())
                .await
                .context("Failed to ack delivery")?;
        }
        Disposition::DeadLetter => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: false,
                    ..BasicNackOptions::default()
                })
                .await
                .context("Failed to nack delivery")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::StoreWriteBackoff;
    use crate::retry::{RetryScheduler, RetrySettings};
    use crate::testing::ScriptedGateway;
    use common::{GatewayError, InMemoryStore};
    use std::sync::Arc;
    use std::time::Duration;

    const BODY: &[u8] =
        br#"{"sender":"254712345678","recipient":"merchant-001","amount":500.00}"#;

    fn rejected() -> GatewayError {
        GatewayError::Rejected {
            code: "1".into(),
            description: "Rejected".into(),
        }
    }

    #[test]
    fn success_and_recorded_failures_are_acked() {
        let ok = Ok(Recorded {
            transaction_id: 1,
            checkout_request_id: "ws_CO_1234".into(),
        });
        assert_eq!(disposition(&ok), Disposition::Ack);

        let recorded = Err(IntakeError::Gateway {
            error: rejected(),
            recorded: true,
        });
        assert_eq!(disposition(&recorded), Disposition::Ack);

        let unrecorded_payment = Err(IntakeError::Unrecorded {
            checkout_request_id: "ws_CO_1234".into(),
            error: anyhow::anyhow!("pool timed out"),
        });
        assert_eq!(disposition(&unrecorded_payment), Disposition::Ack);

        let invalid = Err(IntakeError::Invalid("amount".into()));
        assert_eq!(disposition(&invalid), Disposition::Ack);
    }

    #[test]
    fn failure_without_record_is_dead_lettered() {
        let outcome = Err(IntakeError::Gateway {
            error: rejected(),
            recorded: false,
        });
        assert_eq!(disposition(&outcome), Disposition::DeadLetter);
    }

    #[tokio::test]
    async fn store_outage_costs_one_gateway_call_per_delivery() {
        let store = InMemoryStore::new();
        store.set_unavailable(true).await;
        let gateway = Arc::new(ScriptedGateway::default());
        let pipeline = IntakePipeline::new(gateway.clone(), Arc::new(store.clone())).with_backoff(
            StoreWriteBackoff {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        );

        let mut deliveries = 0;
        while deliveries < 10 {
            deliveries += 1;
            let outcome = pipeline.handle(BODY).await;
            assert!(matches!(
                outcome,
                Err(IntakeError::Gateway { recorded: false, .. })
            ));
            match disposition(&outcome) {
                Disposition::Ack | Disposition::DeadLetter => break,
            }
        }
        assert_eq!(deliveries, 1);
        assert_eq!(gateway.calls().len(), 1);

        let scheduler = RetryScheduler::new(
            gateway.clone(),
            Arc::new(store.clone()),
            RetrySettings::default(),
        );
        assert!(scheduler.run_cycle().await.is_err());
        assert_eq!(gateway.calls().len(), 1);
    }
}
