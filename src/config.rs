//! Environment-driven configuration.
//!
//! Every process reads the same set of variables once at startup. Only
//! missing or unparsable values fail startup; unreachable services are
//! handled by the per-service retry loops instead.

use serde::Deserialize;
use serde_aux::prelude::deserialize_number_from_string;

use crate::error::PipelineError;

/// One search-index host. `ES_HOSTS` is a JSON list of these; ports are
/// accepted as numbers or strings.
#[derive(Debug, Clone, Deserialize)]
pub struct EsHost {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    /// Fixed delay between reconnection attempts, seconds.
    pub retry_delay_secs: u64,
}

impl BrokerConfig {
    /// AMQP URI with the long-haul heartbeat and connection timeout the
    /// publishers rely on.
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:5672/%2f?heartbeat=600&connection_timeout=300000",
            self.user, self.password, self.host
        )
    }

    /// MQTT rides the same broker host on the standard port with the same
    /// credentials.
    pub fn mqtt_host(&self) -> (&str, u16) {
        (&self.host, 1883)
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub downloads: String,
    pub vectorize: String,
    pub index: String,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub hosts: Vec<EsHost>,
    pub index: String,
    pub dims: usize,
    /// When true (default) the indexer acks a batch before dispatching the
    /// bulk request; when false it bulks first so failures are redelivered.
    pub ack_before_bulk: bool,
}

#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub auth_source: String,
}

impl LogStoreConfig {
    pub fn connection_uri(&self) -> String {
        format!(
            "mongodb://{}:{}@{}:{}/?authSource={}",
            self.user, self.password, self.host, self.port, self.auth_source
        )
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub queues: QueueConfig,
    pub search: SearchConfig,
    pub logstore: LogStoreConfig,
    /// Concurrency bound for per-record processing in the downloader.
    pub max_workers: usize,
    /// Machine identifier attached to telemetry events.
    pub machine: String,
}

fn require(name: &str) -> Result<String, PipelineError> {
    std::env::var(name).map_err(|_| PipelineError::Config(format!("{name} is not set")))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, PipelineError> {
    raw.parse()
        .map_err(|_| PipelineError::Config(format!("{name} is not a valid value: {raw}")))
}

/// Parses the `ES_HOSTS` JSON list. Split out so it can be exercised without
/// touching the process environment.
pub fn parse_es_hosts(raw: &str) -> Result<Vec<EsHost>, PipelineError> {
    let hosts: Vec<EsHost> = serde_json::from_str(raw)
        .map_err(|e| PipelineError::Config(format!("ES_HOSTS is not a valid host list: {e}")))?;
    if hosts.is_empty() {
        return Err(PipelineError::Config("ES_HOSTS is empty".to_string()));
    }
    Ok(hosts)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, PipelineError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(PipelineError::Config(format!(
            "{name} is not a valid boolean: {other}"
        ))),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, PipelineError> {
        let broker = BrokerConfig {
            host: require("RABBITMQ_HOST")?,
            user: require("RABBITMQ_USER")?,
            password: require("RABBITMQ_PASSWORD")?,
            retry_delay_secs: parse("RABBITMQ_RETRY_DELAY", &optional("RABBITMQ_RETRY_DELAY", "5"))?,
        };

        let queues = QueueConfig {
            downloads: require("DOWNLOAD_QUEUE")?,
            vectorize: require("VECTORIZATION_QUEUE")?,
            index: require("INDEXING_QUEUE")?,
        };

        let search = SearchConfig {
            hosts: parse_es_hosts(&require("ES_HOSTS")?)?,
            index: require("ES_INDEX")?,
            dims: parse("ES_DIMS", &optional("ES_DIMS", "384"))?,
            ack_before_bulk: parse_bool(
                "INDEX_ACK_BEFORE_BULK",
                &optional("INDEX_ACK_BEFORE_BULK", "true"),
            )?,
        };

        let logstore = LogStoreConfig {
            host: require("MONGO_HOST")?,
            port: parse("MONGO_PORT", &optional("MONGO_PORT", "27017"))?,
            user: require("MONGO_USER")?,
            password: require("MONGO_PASS")?,
            auth_source: require("MONGO_AUTH_SRC")?,
        };

        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max_workers = match std::env::var("MAX_WORKERS") {
            Ok(raw) => parse("MAX_WORKERS", &raw)?,
            Err(_) => default_workers,
        };

        Ok(Config {
            broker,
            queues,
            search,
            logstore,
            max_workers,
            machine: optional("MACHINE", "unknown"),
        })
    }
}
