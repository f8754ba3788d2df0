use mosapi_client::EntityType;
use serde::Deserialize;
use std::fs::File;
use std::path::PathBuf;

/// MoSAPI allows at most this many concurrent sessions per certificate; the
/// worker pool never exceeds it no matter what the config says.
pub const MAX_CONCURRENT_SESSIONS: usize = 4;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Root URL of the MoSAPI deployment.
    #[serde(rename = "mosapiUrl", alias = "mosapiServiceUrl")]
    pub mosapi_url: String,

    /// Whether this operator is a registry (`ry`) or registrar (`rr`).
    #[serde(rename = "entityType", alias = "mosapiEntityType")]
    pub entity_type: EntityType,

    /// TLD labels to poll. Order is preserved in batch responses.
    #[serde(rename = "mosapiTlds", default)]
    pub tlds: Vec<String>,

    /// Monitored service names (dns, rdds, epp, ...).
    #[serde(rename = "mosapiServices", default = "default_services")]
    pub services: Vec<String>,

    #[serde(rename = "mosapiTldThreadCnt", default = "default_thread_cnt")]
    pub tld_thread_cnt: usize,

    #[serde(rename = "mosapiMetricsThreadCnt", default = "default_thread_cnt")]
    pub metrics_thread_cnt: usize,

    /// Deadline for one batch operation across all TLDs, in seconds.
    #[serde(rename = "mosapiBatchDeadlineSecs", default)]
    pub batch_deadline_secs: Option<u64>,

    /// Recipient of the daily abuse report email.
    #[serde(rename = "mosapiAbuseEmailAddress", default)]
    pub abuse_email_address: Option<String>,

    /// Secret names holding the PEM client certificate and private key.
    #[serde(rename = "tlsCertSecret")]
    pub tls_cert_secret: String,
    #[serde(rename = "tlsKeySecret")]
    pub tls_key_secret: String,

    /// Directory backing the file secret store.
    #[serde(rename = "secretsDir")]
    pub secrets_dir: PathBuf,

    /// SQLite database holding persisted threat matches.
    #[serde(rename = "threatDbPath")]
    pub threat_db_path: PathBuf,

    pub listener: Listener,

    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

fn default_services() -> Vec<String> {
    vec!["dns".into(), "rdds".into()]
}

fn default_thread_cnt() -> usize {
    MAX_CONCURRENT_SESSIONS
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        Ok(config)
    }

    /// Worker pool size, clamped to the per-certificate session cap.
    pub fn tld_workers(&self) -> usize {
        self.tld_thread_cnt.clamp(1, MAX_CONCURRENT_SESSIONS)
    }

    pub fn metrics_workers(&self) -> usize {
        self.metrics_thread_cnt.max(1)
    }

    pub fn batch_deadline(&self) -> Option<std::time::Duration> {
        self.batch_deadline_secs.map(std::time::Duration::from_secs)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
