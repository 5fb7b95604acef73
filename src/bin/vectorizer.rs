//! The vectorizer consumes page records in document batches, encodes every
//! sentence window on the accelerator, reduces each document to one
//! normalized mean embedding and publishes it to the indexing queue.
//!
//! The broker I/O task never blocks on compute: deliveries are handed off
//! through a bounded internal queue and a single batch worker owns all
//! publishing and acking. A full internal queue suspends the forwarding
//! task, which together with the prefetch cap is the backpressure path.
//!
//! Connection lifecycle: Connecting -> Consuming -> Publishing -> Recovering
//! -> Consuming. Any consumer-side error tears down channel and connection;
//! unacked deliveries in flight are redelivered by the broker, so duplicates
//! are possible and accepted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::{Channel, Connection};
use metrics::{counter, increment_counter};
use semcrawl::config::Config;
use semcrawl::embedding::reduce_documents;
use semcrawl::encoder::Encoder;
use semcrawl::rabbitmq::{
    declare_durable_queue, publish, rabbitmq_connection, rabbitmq_connection_bounded,
    rabbitmq_consumer, set_prefetch,
};
use semcrawl::records::{EmbeddingRecord, PageRecord};
use semcrawl::segment::segment_text;
use semcrawl::telemetry::{TelemetryEvent, TelemetryPublisher};
use semcrawl::tracing_and_metrics::{run_metrics_server, setup_tracing};
use tokio::sync::mpsc;

/// Max documents pulled into one processing batch; also the prefetch count
/// and the internal queue bound.
const DOC_BATCH_SIZE: usize = 1000;

/// How long the worker waits for a batch to fill before processing what it
/// has.
const BATCH_WINDOW: Duration = Duration::from_millis(100);

/// Idle sleep when the internal queue was empty for a whole window.
const IDLE_SLEEP: Duration = Duration::from_millis(50);

const SEGMENT_MAX_WORDS: usize = 150;
const SEGMENT_OVERLAP: usize = 2;

const PUBLISH_RETRIES: u32 = 5;

/// One delivery as handed from the forwarding task to the batch worker.
struct QueuedDelivery {
    tag: u64,
    body: Vec<u8>,
}

#[tokio::main]
async fn main() {
    setup_tracing();
    tokio::task::spawn(run_metrics_server(9002));

    let run_result = run("vectorizer").await;
    if let Err(e) = run_result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(worker_name: &str) -> Result<()> {
    let config = Arc::new(Config::from_env()?);
    let encoder = Arc::new(tokio::task::spawn_blocking(Encoder::new).await??);
    tracing::info!("Encoder ready on device {}", encoder.device());
    let telemetry = Arc::new(TelemetryPublisher::connect(
        &config.broker,
        &format!("{worker_name}-{}", config.machine),
    ));

    loop {
        // Connecting
        let rabbit_conn = rabbitmq_connection(&config.broker).await;

        let channel = rabbit_conn.create_channel().await?;
        declare_durable_queue(&channel, &config.queues.vectorize).await?;
        declare_durable_queue(&channel, &config.queues.index).await?;
        set_prefetch(&channel, DOC_BATCH_SIZE as u16).await?;
        let consumer = rabbitmq_consumer(&channel, &config.queues.vectorize, worker_name).await?;

        let (tx, rx) = mpsc::channel::<QueuedDelivery>(DOC_BATCH_SIZE);
        let worker = tokio::spawn(batch_worker(
            rx,
            channel.clone(),
            Arc::clone(&config),
            Arc::clone(&encoder),
            Arc::clone(&telemetry),
        ));

        tracing::info!("{worker_name} awaiting messages...");

        // Consuming: this task only forwards deliveries into the queue.
        let shutdown = forward_deliveries(consumer, tx).await;

        // The sender is gone; the worker drains the queue, finishes its
        // in-flight batch and returns.
        if let Err(e) = worker.await {
            tracing::error!(err.msg = %e, "Batch worker panicked");
        }
        let _ = rabbit_conn.close(200, "vectorizer closing").await;

        if shutdown {
            return Ok(());
        }

        // Recovering
        tracing::warn!(
            "Connection lost. Reconnecting in {}s.",
            config.broker.retry_delay_secs
        );
        tokio::time::sleep(Duration::from_secs(config.broker.retry_delay_secs)).await;
    }
}

/// Pushes deliveries into the internal queue until interrupt (true) or a
/// consumer error (false).
async fn forward_deliveries(
    mut consumer: lapin::Consumer,
    tx: mpsc::Sender<QueuedDelivery>,
) -> bool {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, stopping consumption.");
                return true;
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let queued = QueuedDelivery {
                            tag: delivery.delivery_tag,
                            body: delivery.data,
                        };
                        if tx.send(queued).await.is_err() {
                            return false;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(err.msg = %e, err.details = ?e, "Vectorizer failed to receive message from RabbitMQ. Reconnecting.");
                        return false;
                    }
                    None => return false,
                }
            }
        }
    }
}

enum Batch {
    Items(Vec<QueuedDelivery>),
    Empty,
    Closed,
}

/// Drains up to `max` queued deliveries, waiting at most one window for the
/// batch to fill.
async fn collect_batch(rx: &mut mpsc::Receiver<QueuedDelivery>, max: usize) -> Batch {
    let deadline = tokio::time::Instant::now() + BATCH_WINDOW;
    let mut items = Vec::new();

    while items.len() < max {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {
                return if items.is_empty() {
                    Batch::Closed
                } else {
                    Batch::Items(items)
                };
            }
            Err(_) => break,
        }
    }

    if items.is_empty() {
        Batch::Empty
    } else {
        Batch::Items(items)
    }
}

/// Owns all broker writes: publishes embeddings on its own connection and
/// acks on the consumer channel it was given. Runs until the internal queue
/// closes and is drained.
async fn batch_worker(
    mut rx: mpsc::Receiver<QueuedDelivery>,
    consumer_channel: Channel,
    config: Arc<Config>,
    encoder: Arc<Encoder>,
    telemetry: Arc<TelemetryPublisher>,
) {
    let mut publisher = ResilientPublisher::new(Arc::clone(&config));
    let mut pending_tags: Vec<u64> = Vec::new();

    loop {
        match collect_batch(&mut rx, DOC_BATCH_SIZE).await {
            Batch::Closed => break,
            Batch::Empty => {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
            Batch::Items(items) => {
                let size = items.len();
                if let Err(e) = process_batch(
                    items,
                    &consumer_channel,
                    &config,
                    &encoder,
                    &telemetry,
                    &mut publisher,
                    &mut pending_tags,
                )
                .await
                {
                    tracing::error!(err.msg = %e, "Batch of {size} failed; messages stay unacked for redelivery");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    if !pending_tags.is_empty() {
        tracing::warn!(
            "{} deliveries left unacked; the broker will redeliver them",
            pending_tags.len()
        );
    }
    publisher.close().await;
}

#[allow(clippy::too_many_arguments)]
async fn process_batch(
    items: Vec<QueuedDelivery>,
    consumer_channel: &Channel,
    config: &Config,
    encoder: &Arc<Encoder>,
    telemetry: &TelemetryPublisher,
    publisher: &mut ResilientPublisher,
    pending_tags: &mut Vec<u64>,
) -> Result<()> {
    // Parse + segment. Unparsable messages are rejected without requeue so
    // they cannot poison the queue.
    let segment_start = Instant::now();
    let (docs, rejects, segments, counts) =
        tokio::task::spawn_blocking(move || segment_batch(items)).await?;
    let time_segment = segment_start.elapsed().as_secs_f64();

    for tag in rejects {
        let _ = consumer_channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: false,
                },
            )
            .await;
    }
    if docs.is_empty() {
        return Ok(());
    }

    // Encode all segments in accelerator mini-batches.
    let encode_start = Instant::now();
    let batch_encoder = Arc::clone(encoder);
    let (flat, dim) =
        tokio::task::spawn_blocking(move || batch_encoder.encode(&segments)).await??;
    let time_encode = encode_start.elapsed().as_secs_f64();

    // Reduce on the CPU: per-document mean, then L2 normalization.
    let reduce_start = Instant::now();
    let embeddings =
        tokio::task::spawn_blocking(move || reduce_documents(&flat, dim, &counts)).await?;
    let time_reduce = reduce_start.elapsed().as_secs_f64();

    // Publish + ack, one document at a time, in input order.
    for ((tag, page), embedding) in docs.iter().zip(embeddings) {
        let record = EmbeddingRecord {
            url: page.url.clone(),
            h1: page.h1.clone(),
            embedding,
        };

        if !publisher.publish(&config.queues.index, &record).await {
            tracing::error!(url = %page.url, "Publish exhausted retries; leaving delivery unacked");
            pending_tags.push(*tag);
            continue;
        }

        if let Err(e) = consumer_channel
            .basic_ack(*tag, BasicAckOptions::default())
            .await
        {
            tracing::warn!(err.msg = %e, url = %page.url, "Failed to ack delivery");
            pending_tags.push(*tag);
        }
        increment_counter!("vectorizer_docs_published");

        let event = TelemetryEvent::Vector {
            url: page.url.clone(),
            time_encode: time_segment,
            time_embeding: time_encode,
            time_get_rabbit_connection: publisher.connection_time(),
            computer: config.machine.clone(),
        };
        if let Err(e) = telemetry.publish(&event).await {
            tracing::warn!(err.msg = %e, "Failed to publish telemetry event");
        }
    }

    counter!("vectorizer_batch_docs", docs.len() as u64);
    tracing::info!(
        "Batch done: {} docs, segment={time_segment:.3}s encode={time_encode:.3}s reduce={time_reduce:.3}s",
        docs.len()
    );

    Ok(())
}

type SegmentedBatch = (
    Vec<(u64, PageRecord)>,
    Vec<u64>,
    Vec<String>,
    Vec<usize>,
);

/// Parses every queued delivery and flattens all sentence windows into one
/// segment list, remembering how many windows each document contributed.
fn segment_batch(items: Vec<QueuedDelivery>) -> SegmentedBatch {
    let mut docs = Vec::with_capacity(items.len());
    let mut rejects = Vec::new();
    let mut segments = Vec::new();
    let mut counts = Vec::with_capacity(items.len());

    for item in items {
        let page: PageRecord = match serde_json::from_slice(&item.body) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(err.msg = %e, "Page record cannot be parsed; rejected");
                rejects.push(item.tag);
                continue;
            }
        };

        let windows = segment_text(&page.text, SEGMENT_MAX_WORDS, SEGMENT_OVERLAP);
        counts.push(windows.len());
        segments.extend(windows);
        docs.push((item.tag, page));
    }

    (docs, rejects, segments, counts)
}

/// Publisher with its own connection, rebuilt from scratch on every failed
/// attempt with a capped exponential pause. Tracks how long its most recent
/// connection took to set up; that is the connection timing reported with
/// each document's telemetry.
struct ResilientPublisher {
    config: Arc<Config>,
    connection: Option<Connection>,
    channel: Option<Channel>,
    connection_time: f64,
}

impl ResilientPublisher {
    fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            connection: None,
            channel: None,
            connection_time: 0.0,
        }
    }

    /// Setup latency of the connection currently carrying the publishes.
    fn connection_time(&self) -> f64 {
        self.connection_time
    }

    async fn channel(&mut self) -> Result<&Channel> {
        if self.channel.is_none() {
            let connect_start = Instant::now();
            let connection = rabbitmq_connection_bounded(&self.config.broker, 1).await?;
            let channel = connection.create_channel().await?;
            declare_durable_queue(&channel, &self.config.queues.index).await?;
            self.connection_time = connect_start.elapsed().as_secs_f64();
            self.connection = Some(connection);
            self.channel = Some(channel);
        }
        Ok(self.channel.as_ref().expect("channel just set"))
    }

    async fn publish(&mut self, queue: &str, record: &EmbeddingRecord) -> bool {
        for attempt in 1..=PUBLISH_RETRIES {
            match self.channel().await {
                Ok(channel) => match publish(channel, queue, record).await {
                    Ok(()) => return true,
                    Err(e) => {
                        tracing::warn!(err.msg = %e, "Publish failed (attempt {attempt}/{PUBLISH_RETRIES})");
                    }
                },
                Err(e) => {
                    tracing::warn!(err.msg = %e, "Publisher connection failed (attempt {attempt}/{PUBLISH_RETRIES})");
                }
            }

            self.reset().await;
            let pause = Duration::from_millis((500u64 << (attempt - 1)).min(2000));
            tokio::time::sleep(pause).await;
        }
        false
    }

    async fn reset(&mut self) {
        self.channel = None;
        if let Some(connection) = self.connection.take() {
            let _ = connection.close(200, "publisher rebuild").await;
        }
    }

    async fn close(&mut self) {
        self.reset().await;
    }
}
