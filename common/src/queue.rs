use anyhow::Context;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{BasicPublishOptions, BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
};

use crate::schema::TransactionRequest;

pub const DEFAULT_QUEUE: &str = "transactions";

/// AMQP connection with one channel bound to the payment request queue.
pub struct RequestQueue {
    connection: Connection,
    channel: Channel,
    name: String,
}

impl RequestQueue {
    /// Connects and declares the queue (durable, so undelivered requests
    /// survive a broker restart while no consumer is running).
    pub async fn connect(url: &str, name: &str) -> anyhow::Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open a channel")?;
        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare queue `{}`", name))?;
        Ok(Self {
            connection,
            channel,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Limits unacknowledged deliveries so requests are handled one at a time.
    pub async fn set_prefetch(&self, count: u16) -> anyhow::Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .context("Failed to set channel prefetch")
    }

    pub async fn publish(&self, request: &TransactionRequest) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(request).context("Failed to serialize request")?;
        self.channel
            .basic_publish(
                "",
                &self.name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .context("Failed to publish request")?
            .await
            .context("Broker did not confirm publish")?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(e) = self.channel.close(200, "closing").await {
            log::warn!("Failed to close AMQP channel: {}", e);
        }
        if let Err(e) = self.connection.close(200, "closing").await {
            log::warn!("Failed to close AMQP connection: {}", e);
        }
    }
}
