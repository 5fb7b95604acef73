//! The downloader(s) pull WARC jobs from the download queue, fetch the
//! archive from the CommonCrawl host, extract the French pages and publish
//! one page record per hit to the vectorization queue.
//!
//! A job only acks after every page record of its file has been published;
//! any per-job failure (download, WARC parse, publish exhaustion) nacks with
//! requeue so another worker picks the file up. Per-record extraction
//! failures are swallowed and logged.

use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::{Channel, Connection};
use metrics::{counter, increment_counter};
use semcrawl::commoncrawl::{download_warc, response_records, staging_path};
use semcrawl::config::Config;
use semcrawl::extract;
use semcrawl::rabbitmq::{
    publish, rabbitmq_channel_with_queue, rabbitmq_connection, rabbitmq_connection_bounded,
    rabbitmq_consumer, set_prefetch,
};
use semcrawl::records::{PageRecord, WarcJob};
use semcrawl::telemetry::{TelemetryEvent, TelemetryPublisher};
use semcrawl::tracing_and_metrics::{run_metrics_server, setup_tracing};

const PUBLISH_RETRIES: u32 = 3;
const PUBLISH_RETRY_PAUSE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    setup_tracing();
    tokio::task::spawn(run_metrics_server(9001));

    let run_result = run("downloader").await;
    if let Err(e) = run_result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(worker_name: &str) -> Result<()> {
    let config = Config::from_env()?;
    let telemetry =
        TelemetryPublisher::connect(&config.broker, &format!("{worker_name}-{}", config.machine));
    let http = reqwest::Client::new();

    loop {
        let rabbit_conn = rabbitmq_connection(&config.broker).await;

        let (channel, _queue) =
            rabbitmq_channel_with_queue(&rabbit_conn, &config.queues.downloads).await?;
        set_prefetch(&channel, 1).await?;
        let mut consumer =
            rabbitmq_consumer(&channel, &config.queues.downloads, worker_name).await?;

        tracing::info!("{worker_name} waiting for WARC jobs...");

        let mut shutdown = false;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, stopping {worker_name}.");
                    shutdown = true;
                    break;
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            if let Err(e) = process_job(&config, &http, &telemetry, &delivery).await
                            {
                                tracing::warn!(err.msg = %e, "Broker operation failed. Reconnecting.");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(err.msg = %e, err.details = ?e, "Downloader failed to receive message from RabbitMQ. Reconnecting.");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = rabbit_conn.close(200, "downloader closing").await;
        if shutdown {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(config.broker.retry_delay_secs)).await;
    }
}

async fn process_job(
    config: &Config,
    http: &reqwest::Client,
    telemetry: &TelemetryPublisher,
    delivery: &lapin::message::Delivery,
) -> Result<()> {
    let job: WarcJob = match serde_json::from_slice(&delivery.data) {
        Ok(job) => job,
        Err(e) => {
            // unparsable jobs would requeue forever
            tracing::warn!(err.msg = %e, "Job cannot be parsed; rejected");
            delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await?;
            return Ok(());
        }
    };

    match process_warc(config, http, &job).await {
        Ok(timings) => {
            delivery.ack(BasicAckOptions::default()).await?;
            increment_counter!("downloader_warc_processed");

            let event = TelemetryEvent::Warc {
                warc_url: job.warc_url.clone(),
                total_time: timings.download
                    + timings.load
                    + timings.processing
                    + timings.connection,
                download_time: timings.download,
                load_time: timings.load,
                processing_time: timings.processing,
                rabbit_connection_time: timings.connection,
                computer: config.machine.clone(),
            };
            if let Err(e) = telemetry.publish(&event).await {
                tracing::warn!(err.msg = %e, "Failed to publish telemetry event");
            }
        }
        Err(e) => {
            tracing::error!(err.msg = %e, warc_url = %job.warc_url, "WARC job failed; requeueing");
            delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await?;
        }
    }

    Ok(())
}

/// Per-job phase timings reported with the `"warc"` telemetry event.
/// `connection` is the setup latency of this job's dedicated publisher
/// connection, not the long-lived consumer connection.
struct JobTimings {
    download: f64,
    load: f64,
    processing: f64,
    connection: f64,
}

async fn process_warc(
    config: &Config,
    http: &reqwest::Client,
    job: &WarcJob,
) -> Result<JobTimings> {
    let local_file = staging_path(&job.warc_url);

    let download_start = Instant::now();
    download_warc(http, &job.warc_url, &local_file).await?;
    let download = download_start.elapsed().as_secs_f64();

    let load_start = Instant::now();
    let reader_path = local_file.clone();
    let records = tokio::task::spawn_blocking(move || response_records(&reader_path)).await??;
    let load = load_start.elapsed().as_secs_f64();
    tracing::info!("{} response records loaded from {}", records.len(), job.warc_url);

    let processing_start = Instant::now();
    let pages: Vec<PageRecord> = stream::iter(records)
        .map(|(url, body)| {
            tokio::task::spawn_blocking(move || extract::process_record(&url, &body))
        })
        .buffer_unordered(config.max_workers)
        .filter_map(|joined| async move { joined.ok().flatten() })
        .collect()
        .await;

    let connection = publish_pages(config, &pages).await?;
    let processing = processing_start.elapsed().as_secs_f64() - connection;

    counter!("downloader_pages_published", pages.len() as u64);
    tracing::info!(
        "{} French pages published from {}",
        pages.len(),
        job.warc_url
    );

    // free the staging space; failure here is not worth a retry of the file
    if let Err(e) = tokio::fs::remove_file(&local_file).await {
        tracing::warn!(err.msg = %e, "Failed to remove {}", local_file.display());
    }

    Ok(JobTimings {
        download,
        load,
        processing,
        connection,
    })
}

/// Publishes every page over a dedicated connection, rebuilding it on
/// transport errors up to [`PUBLISH_RETRIES`] times before giving up on the
/// whole file. Returns how long the publisher connection took to set up; a
/// rebuild overwrites it, so the value reflects the connection that actually
/// carried the publishes.
async fn publish_pages(config: &Config, pages: &[PageRecord]) -> Result<f64> {
    if pages.is_empty() {
        return Ok(0.0);
    }

    let connect_start = Instant::now();
    let mut publisher: Connection =
        rabbitmq_connection_bounded(&config.broker, PUBLISH_RETRIES).await?;
    let (mut channel, _queue) =
        rabbitmq_channel_with_queue(&publisher, &config.queues.vectorize).await?;
    let mut connection_time = connect_start.elapsed().as_secs_f64();

    for page in pages {
        publish_with_retry(
            config,
            &mut publisher,
            &mut channel,
            &mut connection_time,
            page,
        )
        .await?;
    }

    let _ = publisher.close(200, "publishing done").await;
    Ok(connection_time)
}

async fn publish_with_retry(
    config: &Config,
    publisher: &mut Connection,
    channel: &mut Channel,
    connection_time: &mut f64,
    page: &PageRecord,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match publish(channel, &config.queues.vectorize, page).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < PUBLISH_RETRIES => {
                tracing::warn!(err.msg = %e, url = %page.url, "Publish failed (attempt {attempt}). Rebuilding publisher connection.");
                tokio::time::sleep(PUBLISH_RETRY_PAUSE).await;

                let _ = publisher.close(200, "publisher rebuild").await;
                let connect_start = Instant::now();
                *publisher = rabbitmq_connection_bounded(&config.broker, 1).await?;
                let (fresh, _queue) =
                    rabbitmq_channel_with_queue(publisher, &config.queues.vectorize).await?;
                *channel = fresh;
                *connection_time = connect_start.elapsed().as_secs_f64();
            }
            Err(e) => return Err(e),
        }
    }
}
