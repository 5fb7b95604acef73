//! Helpers for fetching CommonCrawl WARC archives and iterating their
//! response records.

use std::io::BufReader;
use std::path::{Path, PathBuf};

use autometrics::autometrics;
use flate2::read::MultiGzDecoder;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;
use warc::{WarcHeader, WarcReader};

use crate::error::PipelineError;

pub const ARCHIVE_BASE_URL: &str = "https://data.commoncrawl.org";

/// Local staging area for in-flight archives. Files are removed again after
/// the job acks.
pub const STAGING_DIR: &str = "./warc";

/// Staging file for a WARC path. The name is the md5 of the path so two
/// workers pulling different jobs never collide on disk.
pub fn staging_path(warc_url: &str) -> PathBuf {
    let digest = md5::compute(warc_url.as_bytes());
    Path::new(STAGING_DIR).join(format!("{digest:x}.warc.gz"))
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    if let Some(prefix) = path.parent() {
        std::fs::create_dir_all(prefix)?;
    }
    Ok(())
}

/// Full archive URL for a relative WARC path.
pub fn archive_url(warc_url: &str) -> String {
    format!("{ARCHIVE_BASE_URL}/{warc_url}")
}

/// Streams the archive for `warc_url` into `path`. See [`download_to`].
pub async fn download_warc(
    client: &reqwest::Client,
    warc_url: &str,
    path: &Path,
) -> Result<(), PipelineError> {
    download_to(client, &archive_url(warc_url), path).await
}

/// Streams `url` into `path`, writing as the body arrives in 8-KiB slices.
/// Non-success statuses and transport errors map to
/// [`PipelineError::DownloadFailed`] so the caller can nack-requeue the job.
#[autometrics]
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<(), PipelineError> {
    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(failed(format!("status {}", response.status())));
    }

    create_parent(path).map_err(|e| failed(e.to_string()))?;
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| failed(e.to_string()))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| failed(e.to_string()))?;
        for slice in chunk.chunks(8192) {
            file.write_all(slice)
                .await
                .map_err(|e| failed(e.to_string()))?;
        }
    }
    file.flush().await.map_err(|e| failed(e.to_string()))?;

    info!("WARC downloaded to {}", path.display());
    Ok(())
}

/// Reads every record of type `response` out of a gzipped WARC file and
/// returns `(target_uri, raw_body)` pairs. Bodies are decoded as UTF-8 with
/// replacement; a malformed record fails the whole file so the job can be
/// requeued.
pub fn response_records(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let file = std::fs::File::open(path)?;

    let mut records = Vec::new();
    for entry in WarcReader::new(BufReader::new(MultiGzDecoder::new(file))).iter_records() {
        let entry = entry?;

        match entry.header(WarcHeader::WarcType) {
            Some(kind) if kind == "response" => {}
            _ => continue,
        }
        let Some(target_uri) = entry.header(WarcHeader::TargetURI) else {
            continue;
        };

        let body = String::from_utf8_lossy(entry.body()).into_owned();
        records.push((target_uri.into_owned(), body));
    }

    Ok(records)
}
