//! Wire records exchanged over the work queues.
//!
//! All three queues carry JSON with `content_type=application/json` and
//! persistent delivery. Field names are the deployed wire format; changing
//! them breaks interop with messages already sitting in the queues.

use serde::{Deserialize, Serialize};

/// Payload on the download queue: one job per WARC file, identified by its
/// path relative to the archive host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarcJob {
    pub warc_url: String,
}

/// Payload on the vectorization queue: one extracted page.
///
/// At publication time `text` is non-empty and was detected as French; the
/// vectorizer relies on both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub h1: String,
    pub text: String,
}

/// Payload on the indexing queue: one page with its document embedding.
///
/// `embedding` holds 384 floats with unit L2 norm, or all zeros when the
/// encoder produced a zero mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub url: String,
    pub h1: String,
    pub embedding: Vec<f32>,
}
