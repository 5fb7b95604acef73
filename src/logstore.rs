//! Time-series storage for telemetry events.
//!
//! One collection per pipeline step, each a MongoDB time-series collection
//! keyed on the collector-side receipt timestamp.

use mongodb::bson::{DateTime, Document};
use mongodb::options::{CreateCollectionOptions, TimeseriesGranularity, TimeseriesOptions};
use mongodb::{Client, Database};
use tracing::info;

use crate::config::LogStoreConfig;

pub const DATABASE: &str = "telemetry";

/// Field stamped by the collector at receipt; also the time-series time
/// field.
pub const CREATED_AT_FIELD: &str = "Created_at";

/// Destination collection and meta-field per telemetry step. Unknown steps
/// map to nothing and are dropped by the collector.
pub fn collection_for_step(step: &str) -> Option<(&'static str, &'static str)> {
    match step {
        "warc" => Some(("warc_logs", "warc_url")),
        "vector" => Some(("vector_logs", "url")),
        "index_batch_async" => Some(("index_logs", "machine")),
        _ => None,
    }
}

pub async fn mongo_client(cfg: &LogStoreConfig) -> anyhow::Result<Client> {
    let client = Client::with_uri_str(cfg.connection_uri()).await?;
    Ok(client)
}

/// Creates the three time-series collections when missing. Safe to run on
/// every startup.
pub async fn ensure_collections(db: &Database) -> anyhow::Result<()> {
    let existing = db.list_collection_names(None).await?;

    for step in ["warc", "vector", "index_batch_async"] {
        let (collection, meta_field) = match collection_for_step(step) {
            Some(target) => target,
            None => continue,
        };
        if existing.iter().any(|name| name == collection) {
            continue;
        }

        let options = CreateCollectionOptions::builder()
            .timeseries(
                TimeseriesOptions::builder()
                    .time_field(CREATED_AT_FIELD.to_string())
                    .meta_field(Some(meta_field.to_string()))
                    .granularity(Some(TimeseriesGranularity::Seconds))
                    .build(),
            )
            .build();
        db.create_collection(collection, options).await?;
        info!("Created time-series collection {collection}");
    }

    Ok(())
}

/// Inserts one event document into the step's collection, stamping the
/// receipt timestamp.
pub async fn insert_event(
    db: &Database,
    collection: &str,
    mut event: Document,
) -> anyhow::Result<()> {
    event.insert(CREATED_AT_FIELD, DateTime::now());
    db.collection::<Document>(collection)
        .insert_one(event, None)
        .await?;
    Ok(())
}
