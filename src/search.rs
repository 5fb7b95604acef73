//! Search-index plumbing: connection, idempotent index creation with the
//! HNSW mapping, bulk insertion, and the batch accumulator the indexer
//! drives.

use std::time::Duration;

use anyhow::Context;
use autometrics::autometrics;
use elasticsearch::http::transport::Transport;
use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts};
use elasticsearch::{BulkOperation, BulkParts, Elasticsearch};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::SearchConfig;
use crate::records::EmbeddingRecord;

/// k-NN mapping for the page index. The dotted `knn.algo_param` keys are the
/// engine's own spelling for the HNSW settings.
pub fn index_mapping(dims: usize) -> Value {
    json!({
        "settings": {
            "index": {
                "knn": true,
                "knn.algo_param.ef_search": 512,
                "knn.algo_param.ef_construction": 512,
                "knn.algo_param.m": 16
            }
        },
        "mappings": {
            "properties": {
                "url": { "type": "keyword" },
                "h1": { "type": "text" },
                "embedding": {
                    "type": "knn_vector",
                    "dimension": dims
                }
            }
        }
    })
}

/// Connects to the first responsive configured host, retrying the whole list
/// forever with the given delay.
pub async fn es_connection(cfg: &SearchConfig, retry_delay_secs: u64) -> Elasticsearch {
    loop {
        for host in &cfg.hosts {
            let url = format!("http://{}:{}", host.host, host.port);
            let client = match Transport::single_node(&url) {
                Ok(transport) => Elasticsearch::new(transport),
                Err(e) => {
                    error!(err.msg = %e, "Invalid search host {url}");
                    continue;
                }
            };
            match client.ping().send().await {
                Ok(response) if response.status_code().is_success() => {
                    info!("Connected to search index at {url}");
                    return client;
                }
                Ok(response) => {
                    error!("Search host {url} answered {}", response.status_code());
                }
                Err(e) => {
                    error!(err.msg = %e, "Search host {url} unreachable");
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(retry_delay_secs)).await;
    }
}

/// Creates the target index unless it already exists. A missing index just
/// means first start.
pub async fn ensure_index(client: &Elasticsearch, cfg: &SearchConfig) -> anyhow::Result<()> {
    let exists = client
        .indices()
        .exists(IndicesExistsParts::Index(&[&cfg.index]))
        .send()
        .await
        .with_context(|| "Failed to check index existence")?;
    if exists.status_code().is_success() {
        return Ok(());
    }

    client
        .indices()
        .create(IndicesCreateParts::Index(&cfg.index))
        .body(index_mapping(cfg.dims))
        .send()
        .await
        .with_context(|| format!("Failed to create index {}", cfg.index))?
        .error_for_status_code()
        .with_context(|| format!("Index creation rejected for {}", cfg.index))?;

    info!("Index {} created", cfg.index);
    Ok(())
}

/// Issues one bulk request for the whole slice and walks the per-item
/// results for partial failures.
#[autometrics]
pub async fn bulk_index(
    client: &Elasticsearch,
    index: &str,
    records: &[EmbeddingRecord],
) -> anyhow::Result<()> {
    let operations: Vec<BulkOperation<Value>> = records
        .iter()
        .map(|record| {
            BulkOperation::index(json!({
                "url": record.url,
                "h1": record.h1,
                "embedding": record.embedding,
            }))
            .into()
        })
        .collect();

    let response = client
        .bulk(BulkParts::Index(index))
        .body(operations)
        .send()
        .await
        .with_context(|| "Bulk request failed")?
        .error_for_status_code()
        .with_context(|| "Bulk request rejected")?;

    let body = response
        .json::<Value>()
        .await
        .with_context(|| "Bulk response unreadable")?;
    if body["errors"].as_bool().unwrap_or(false) {
        for item in body["items"].as_array().into_iter().flatten() {
            if item.pointer("/index/error").is_some() {
                warn!("Bulk item failed: {item}");
            }
        }
        anyhow::bail!("bulk request reported item failures");
    }

    Ok(())
}

/// A batch snapshot handed to the bulk path: the documents plus the highest
/// delivery tag, so a single multi-ack releases exactly these deliveries.
#[derive(Debug)]
pub struct BulkBatch {
    pub records: Vec<EmbeddingRecord>,
    pub last_tag: u64,
}

impl BulkBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Accumulates `(document, delivery tag)` pairs until a batch is full, then
/// hands out a snapshot and resets. One tag is stored per document, so the
/// multi-ack on `last_tag` always releases as many deliveries as the bulk
/// request carries actions.
#[derive(Debug)]
pub struct BulkBatcher {
    capacity: usize,
    records: Vec<EmbeddingRecord>,
    last_tag: u64,
}

impl BulkBatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Vec::with_capacity(capacity),
            last_tag: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds one document. Returns the full batch once `capacity` is reached;
    /// the accumulator is already clear when the snapshot is returned.
    pub fn push(&mut self, record: EmbeddingRecord, delivery_tag: u64) -> Option<BulkBatch> {
        self.records.push(record);
        self.last_tag = delivery_tag;
        if self.records.len() >= self.capacity {
            self.take()
        } else {
            None
        }
    }

    /// Drains whatever has accumulated, full or not. Used for the shutdown
    /// flush.
    pub fn take(&mut self) -> Option<BulkBatch> {
        if self.records.is_empty() {
            return None;
        }
        Some(BulkBatch {
            records: std::mem::take(&mut self.records),
            last_tag: self.last_tag,
        })
    }
}
