//! The collector subscribes to the telemetry topic and persists every event
//! into the time-series collection of its pipeline step.
//!
//! Malformed payloads and unknown steps are logged and dropped; the event
//! stream must never back up behind a bad producer.

use std::time::Duration;

use anyhow::Result;
use metrics::increment_counter;
use mongodb::Database;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use semcrawl::config::Config;
use semcrawl::logstore::{self, collection_for_step, ensure_collections, insert_event};
use semcrawl::telemetry::TELEMETRY_TOPIC;
use semcrawl::tracing_and_metrics::{run_metrics_server, setup_tracing};
use serde_json::Value;

#[tokio::main]
async fn main() {
    setup_tracing();
    tokio::task::spawn(run_metrics_server(9004));

    let run_result = run("collector").await;
    if let Err(e) = run_result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(worker_name: &str) -> Result<()> {
    let config = Config::from_env()?;

    let mongo = logstore::mongo_client(&config.logstore).await?;
    let db = mongo.database(logstore::DATABASE);
    ensure_collections(&db).await?;

    let (host, port) = config.broker.mqtt_host();
    let mut options = MqttOptions::new(format!("{worker_name}-{}", config.machine), host, port);
    options.set_credentials(config.broker.user.clone(), config.broker.password.clone());
    options.set_keep_alive(Duration::from_secs(60));

    let (client, mut eventloop) = AsyncClient::new(options, 64);
    client.subscribe(TELEMETRY_TOPIC, QoS::AtLeastOnce).await?;

    tracing::info!("{worker_name} awaiting telemetry events...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, stopping {worker_name}.");
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(message))) => {
                        handle_event(&db, &message.payload).await;
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // fresh session after a reconnect; subscriptions are gone
                        if let Err(e) = client.subscribe(TELEMETRY_TOPIC, QoS::AtLeastOnce).await {
                            tracing::warn!(err.msg = %e, "Resubscription failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(err.msg = %e, "Telemetry connection lost. Reconnecting in {}s.", config.broker.retry_delay_secs);
                        tokio::time::sleep(Duration::from_secs(config.broker.retry_delay_secs)).await;
                    }
                }
            }
        }
    }
}

/// Parses one payload, routes it by step and inserts it with the receipt
/// timestamp. Every failure path drops the event.
async fn handle_event(db: &Database, payload: &[u8]) {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(err.msg = %e, "Invalid telemetry payload dropped");
            return;
        }
    };
    let Value::Object(mut fields) = value else {
        tracing::warn!("Non-object telemetry payload dropped");
        return;
    };

    let step = match fields.remove("step") {
        Some(Value::String(step)) => step,
        _ => {
            tracing::warn!("Telemetry payload without step dropped");
            return;
        }
    };
    let Some((collection, _meta_field)) = collection_for_step(&step) else {
        tracing::warn!(step = %step, "Telemetry payload with unknown step dropped");
        return;
    };

    let document = match mongodb::bson::to_document(&fields) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!(err.msg = %e, "Telemetry payload not storable; dropped");
            return;
        }
    };

    if let Err(e) = insert_event(db, collection, document).await {
        tracing::error!(err.msg = %e, "Failed to insert telemetry event into {collection}");
    } else {
        increment_counter!("collector_events_stored");
    }
}
