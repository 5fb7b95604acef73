//! Error taxonomy for the pipeline library.
//!
//! Binaries keep using [`anyhow`] at the top level; these variants exist for
//! the failures where the caller's policy depends on which one it got
//! (retry forever vs. fail startup vs. nack-requeue).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Broker connection attempts exhausted their bounded retry count.
    #[error("broker unreachable after {attempts} attempts: {last_error}")]
    BrokerUnreachable { attempts: u32, last_error: String },

    /// Mid-operation broker failure (stream lost, channel error, broken pipe).
    #[error("transient broker failure: {0}")]
    BrokerTransient(#[from] lapin::Error),

    /// Archive fetch returned a non-success status or a transport error.
    #[error("download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The seed file could not be read.
    #[error("seed file unreadable: {0}")]
    SeedIo(#[from] std::io::Error),

    /// A required environment variable is missing or unparsable.
    #[error("invalid configuration: {0}")]
    Config(String),
}
