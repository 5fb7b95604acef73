//! Broker plumbing shared by every binary.
//!
//! Connections are opened through a retry loop with the configured fixed
//! delay: the long-running consumers retry forever, the seeder uses the
//! bounded variant so a dead broker fails its startup instead of hanging it.
//! Queues are always declared durable and messages are always published
//! persistent with a JSON content type.

use std::time::Duration;

use anyhow::Context;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, Queue};
use serde::Serialize;
use tracing::{error, info};

use crate::config::BrokerConfig;
use crate::error::PipelineError;

/// Opens a connection, retrying forever with the configured delay.
pub async fn rabbitmq_connection(cfg: &BrokerConfig) -> Connection {
    let uri = cfg.amqp_uri();
    loop {
        match Connection::connect(&uri, ConnectionProperties::default()).await {
            Ok(conn) => {
                info!("Connected to RabbitMQ at {}", cfg.host);
                return conn;
            }
            Err(e) => {
                error!(
                    err.msg = %e,
                    "RabbitMQ connection failed. Retrying in {}s.",
                    cfg.retry_delay_secs
                );
                tokio::time::sleep(Duration::from_secs(cfg.retry_delay_secs)).await;
            }
        }
    }
}

/// Opens a connection with a bounded number of attempts.
pub async fn rabbitmq_connection_bounded(
    cfg: &BrokerConfig,
    max_attempts: u32,
) -> Result<Connection, PipelineError> {
    let uri = cfg.amqp_uri();
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        match Connection::connect(&uri, ConnectionProperties::default()).await {
            Ok(conn) => {
                info!("Connected to RabbitMQ at {}", cfg.host);
                return Ok(conn);
            }
            Err(e) => {
                error!(
                    err.msg = %e,
                    "RabbitMQ connection failed (attempt {attempt}/{max_attempts})."
                );
                last_error = e.to_string();
                if attempt < max_attempts {
                    tokio::time::sleep(Duration::from_secs(cfg.retry_delay_secs)).await;
                }
            }
        }
    }
    Err(PipelineError::BrokerUnreachable {
        attempts: max_attempts,
        last_error,
    })
}

/// Creates a channel on `conn` and declares `queue` durable on it.
pub async fn rabbitmq_channel_with_queue(
    conn: &Connection,
    queue: &str,
) -> Result<(Channel, Queue), lapin::Error> {
    let channel = conn.create_channel().await?;
    let declared = declare_durable_queue(&channel, queue).await?;
    Ok((channel, declared))
}

pub async fn declare_durable_queue(
    channel: &Channel,
    queue: &str,
) -> Result<Queue, lapin::Error> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
}

/// Caps the number of unacked deliveries the broker pushes at this channel.
pub async fn set_prefetch(channel: &Channel, count: u16) -> Result<(), lapin::Error> {
    channel.basic_qos(count, BasicQosOptions::default()).await
}

/// Manual-ack consumer on an already declared queue.
pub async fn rabbitmq_consumer(
    channel: &Channel,
    queue: &str,
    consumer_tag: &str,
) -> Result<Consumer, lapin::Error> {
    channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
}

/// Publishes `message` to `queue` on the default exchange as persistent JSON
/// and waits for the broker to take it.
pub async fn publish<T: Serialize>(
    channel: &Channel,
    queue: &str,
    message: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(message).with_context(|| "Failed to serialize message")?;
    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            &body,
            BasicProperties::default()
                .with_delivery_mode(2)
                .with_content_type("application/json".into()),
        )
        .await?
        .await?;
    Ok(())
}
