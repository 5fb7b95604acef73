//! Library crate backing the ingestion pipeline binaries.
//!
//! The pipeline moves WARC paths through three durable queues: the seeder
//! enqueues download jobs, the downloader turns archives into French page
//! records, the vectorizer turns page records into normalized embeddings,
//! and the indexer bulk-loads them into the search index. Workers report
//! timings out of band over MQTT; the collector persists those events into
//! time-series collections.

pub mod commoncrawl;
pub mod config;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod extract;
pub mod logstore;
pub mod rabbitmq;
pub mod records;
pub mod search;
pub mod segment;
pub mod telemetry;
pub mod tracing_and_metrics;
