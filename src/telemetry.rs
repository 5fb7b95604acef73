//! Out-of-band telemetry: every worker publishes one JSON event per unit of
//! work on the `logger` MQTT topic; the collector drains the topic into the
//! time-series store.
//!
//! Events are a tagged enum so each step's payload is a plain struct; the
//! serialized field names are the deployed wire format and must not change.

use std::time::Duration;

use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use tracing::warn;

use crate::config::BrokerConfig;

pub const TELEMETRY_TOPIC: &str = "logger";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "step")]
pub enum TelemetryEvent {
    /// One WARC file fully processed by the downloader.
    #[serde(rename = "warc")]
    Warc {
        warc_url: String,
        total_time: f64,
        download_time: f64,
        load_time: f64,
        processing_time: f64,
        rabbit_connection_time: f64,
        computer: String,
    },
    /// One document embedded by the vectorizer.
    #[serde(rename = "vector")]
    Vector {
        url: String,
        time_encode: f64,
        time_embeding: f64,
        time_get_rabbit_connection: f64,
        computer: String,
    },
    /// One asynchronous bulk insert dispatched by the indexer.
    #[serde(rename = "index_batch_async")]
    IndexBatchAsync {
        batchsize: usize,
        batch_time: f64,
        cumulative_index_time: f64,
        time_rabbitmq_connection: f64,
        time_es_connection: f64,
        machine: String,
    },
}

/// Long-lived QoS-1 publisher. The MQTT event loop runs on a background task
/// for the life of the process; a lost connection is re-established by the
/// next poll.
pub struct TelemetryPublisher {
    client: AsyncClient,
}

impl TelemetryPublisher {
    pub fn connect(broker: &BrokerConfig, client_id: &str) -> Self {
        let (host, port) = broker.mqtt_host();
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_credentials(broker.user.clone(), broker.password.clone());
        options.set_keep_alive(Duration::from_secs(60));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    warn!(err.msg = %e, "Telemetry connection lost. Reconnecting.");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });

        Self { client }
    }

    pub async fn publish(&self, event: &TelemetryEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(TELEMETRY_TOPIC, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}
