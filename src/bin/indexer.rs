//! The indexer consumes embedding records in large batches and bulk-loads
//! them into the search index.
//!
//! By default a full batch is acked in one multi-ack and the bulk request is
//! dispatched on a background task so the consuming loop stays hot; a bulk
//! failure then only logs and the batch is lost (throughput trade-off). With
//! `INDEX_ACK_BEFORE_BULK=false` the bulk request runs first and a failure
//! leaves the batch unacked for redelivery.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use elasticsearch::Elasticsearch;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::Channel;
use metrics::{counter, increment_counter};
use semcrawl::config::Config;
use semcrawl::rabbitmq::{
    rabbitmq_channel_with_queue, rabbitmq_connection, rabbitmq_consumer, set_prefetch,
};
use semcrawl::records::EmbeddingRecord;
use semcrawl::search::{bulk_index, ensure_index, es_connection, BulkBatch, BulkBatcher};
use semcrawl::telemetry::{TelemetryEvent, TelemetryPublisher};
use semcrawl::tracing_and_metrics::{run_metrics_server, setup_tracing};

/// Documents per bulk request; also the prefetch count.
const BATCH_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    setup_tracing();
    tokio::task::spawn(run_metrics_server(9003));

    let run_result = run("indexer").await;
    if let Err(e) = run_result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

/// Connection timings reported with every batch event.
#[derive(Clone, Copy)]
struct ConnectionTimings {
    rabbitmq: f64,
    es: f64,
}

async fn run(worker_name: &str) -> Result<()> {
    let config = Arc::new(Config::from_env()?);
    let telemetry = Arc::new(TelemetryPublisher::connect(
        &config.broker,
        &format!("{worker_name}-{}", config.machine),
    ));

    let es_start = Instant::now();
    let es = Arc::new(es_connection(&config.search, config.broker.retry_delay_secs).await);
    let es_time = es_start.elapsed().as_secs_f64();
    ensure_index(&es, &config.search).await?;

    let cumulative_index_time = Arc::new(Mutex::new(0.0f64));

    loop {
        let connect_start = Instant::now();
        let rabbit_conn = rabbitmq_connection(&config.broker).await;
        let timings = ConnectionTimings {
            rabbitmq: connect_start.elapsed().as_secs_f64(),
            es: es_time,
        };

        let (channel, _queue) =
            rabbitmq_channel_with_queue(&rabbit_conn, &config.queues.index).await?;
        set_prefetch(&channel, BATCH_SIZE as u16).await?;
        let mut consumer = rabbitmq_consumer(&channel, &config.queues.index, worker_name).await?;

        let mut batcher = BulkBatcher::new(BATCH_SIZE);
        tracing::info!("{worker_name} awaiting messages...");

        let mut shutdown = false;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, flushing {} buffered documents.", batcher.len());
                    shutdown = true;
                    break;
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            let record: EmbeddingRecord =
                                match serde_json::from_slice(&delivery.data) {
                                    Ok(record) => record,
                                    Err(e) => {
                                        tracing::warn!(err.msg = %e, "Embedding record cannot be parsed; rejected");
                                        if let Err(e) = delivery
                                            .nack(BasicNackOptions {
                                                multiple: false,
                                                requeue: false,
                                            })
                                            .await
                                        {
                                            tracing::warn!(err.msg = %e, "Reject failed. Reconnecting.");
                                            break;
                                        }
                                        continue;
                                    }
                                };

                            increment_counter!("indexer_docs_received");
                            if let Some(batch) = batcher.push(record, delivery.delivery_tag) {
                                if let Err(e) = dispatch_batch(
                                    batch,
                                    &channel,
                                    &config,
                                    &es,
                                    &telemetry,
                                    &cumulative_index_time,
                                    timings,
                                )
                                .await
                                {
                                    tracing::warn!(err.msg = %e, "Batch dispatch failed. Reconnecting.");
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(err.msg = %e, err.details = ?e, "Indexer failed to receive message from RabbitMQ. Reconnecting.");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if shutdown {
            // Flush the residual partial batch the same way as a full one,
            // give the background bulk a moment to get going, then close.
            if let Some(batch) = batcher.take() {
                if let Err(e) = dispatch_batch(
                    batch,
                    &channel,
                    &config,
                    &es,
                    &telemetry,
                    &cumulative_index_time,
                    timings,
                )
                .await
                {
                    tracing::error!(err.msg = %e, "Final flush failed");
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            let _ = channel.close(200, "indexer closing").await;
            let _ = rabbit_conn.close(200, "indexer closing").await;
            return Ok(());
        }

        let _ = rabbit_conn.close(200, "indexer reconnecting").await;
        tokio::time::sleep(Duration::from_secs(config.broker.retry_delay_secs)).await;
    }
}

/// Acks and dispatches one snapshotted batch according to the configured
/// durability mode.
async fn dispatch_batch(
    batch: BulkBatch,
    channel: &Channel,
    config: &Arc<Config>,
    es: &Arc<Elasticsearch>,
    telemetry: &Arc<TelemetryPublisher>,
    cumulative_index_time: &Arc<Mutex<f64>>,
    timings: ConnectionTimings,
) -> Result<()> {
    counter!("indexer_batch_docs", batch.len() as u64);

    if config.search.ack_before_bulk {
        // Release the broker immediately; the bulk request runs behind.
        channel
            .basic_ack(batch.last_tag, BasicAckOptions { multiple: true })
            .await?;

        let es = Arc::clone(es);
        let config = Arc::clone(config);
        let telemetry = Arc::clone(telemetry);
        let cumulative = Arc::clone(cumulative_index_time);
        tokio::spawn(async move {
            background_bulk(batch, &es, &config, &telemetry, &cumulative, timings).await;
        });
    } else {
        match bulk_index(es, &config.search.index, &batch.records).await {
            Ok(()) => {
                channel
                    .basic_ack(batch.last_tag, BasicAckOptions { multiple: true })
                    .await?;
            }
            Err(e) => {
                tracing::error!(err.msg = %e, "Bulk failed; requeueing batch of {}", batch.len());
                channel
                    .basic_nack(
                        batch.last_tag,
                        BasicNackOptions {
                            multiple: true,
                            requeue: true,
                        },
                    )
                    .await?;
            }
        }
    }

    Ok(())
}

async fn background_bulk(
    batch: BulkBatch,
    es: &Elasticsearch,
    config: &Config,
    telemetry: &TelemetryPublisher,
    cumulative_index_time: &Mutex<f64>,
    timings: ConnectionTimings,
) {
    let batch_size = batch.len();
    let start = Instant::now();

    match bulk_index(es, &config.search.index, &batch.records).await {
        Ok(()) => {
            let batch_time = start.elapsed().as_secs_f64();
            let cumulative = {
                let mut total = cumulative_index_time.lock().expect("timing lock");
                *total += batch_time;
                *total
            };

            tracing::info!("Async batch of {batch_size} docs indexed in {batch_time:.3}s");
            let event = TelemetryEvent::IndexBatchAsync {
                batchsize: batch_size,
                batch_time,
                cumulative_index_time: cumulative,
                time_rabbitmq_connection: timings.rabbitmq,
                time_es_connection: timings.es,
                machine: config.machine.clone(),
            };
            if let Err(e) = telemetry.publish(&event).await {
                tracing::warn!(err.msg = %e, "Failed to publish telemetry event");
            }
        }
        Err(e) => {
            // the deliveries were already acked, so these documents are lost
            tracing::error!(err.msg = %e, "Async bulk failed; batch of {batch_size} lost");
        }
    }
}
