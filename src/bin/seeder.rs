//! Seeds the download queue from a file of WARC paths, one job per line.
//!
//! Re-running the seeder re-publishes the same jobs; the pipeline is
//! at-least-once end to end, so downstream stages tolerate the duplicates.

use anyhow::Result;
use clap::Parser;
use metrics::increment_counter;
use semcrawl::config::Config;
use semcrawl::error::PipelineError;
use semcrawl::rabbitmq::{publish, rabbitmq_channel_with_queue, rabbitmq_connection_bounded};
use semcrawl::records::WarcJob;
use semcrawl::tracing_and_metrics::{run_metrics_server, setup_tracing};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File with one WARC path per line.
    #[arg(short('s'), long("seeds"), default_value = "path.paths")]
    seed_file: String,

    /// Give up on the broker after this many connection attempts.
    #[arg(long("connect-attempts"), default_value_t = 5)]
    connect_attempts: u32,
}

#[tokio::main]
async fn main() {
    setup_tracing();
    tokio::task::spawn(run_metrics_server(9000));

    let run_result = run(Args::parse()).await;
    if let Err(e) = run_result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_env()?;

    let seeds = std::fs::read_to_string(&args.seed_file).map_err(PipelineError::SeedIo)?;

    let rabbit_conn = rabbitmq_connection_bounded(&config.broker, args.connect_attempts).await?;
    let (channel, _queue) =
        rabbitmq_channel_with_queue(&rabbit_conn, &config.queues.downloads).await?;

    let mut published = 0usize;
    for line in seeds.lines() {
        let warc_url = line.trim();
        if warc_url.is_empty() {
            continue;
        }

        publish(
            &channel,
            &config.queues.downloads,
            &WarcJob {
                warc_url: warc_url.to_string(),
            },
        )
        .await?;
        increment_counter!("seeder_jobs_published");
        published += 1;
    }

    tracing::info!("{published} download jobs published to {}", config.queues.downloads);

    rabbit_conn.close(200, "seeding done").await?;
    Ok(())
}
