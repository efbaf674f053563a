// SPDX-License-Identifier: Apache-2.0

//! Agent configuration file.
//!
//! The file format is picked from its extension (`.json`, `.yaml`/`.yml` or
//! `.toml`). Any value can then be overridden with `KEYWORD_EXPORTER_`
//! environment variables, using `__` between nested keys, for example
//! `KEYWORD_EXPORTER_REMOTE_WRITE__ADDRESS`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::Deserialize;
use tower::BoxError;

use crate::exporters::prometheus::config::{
    DEFAULT_METRIC_HELP, DEFAULT_METRIC_NAME, DEFAULT_USER_AGENT,
};
use crate::exporters::prometheus::{Authentication, RemoteWriteConfig};
use crate::receivers::file::{StartAt, TailConfig, TrackedFile};

pub const ENV_PREFIX: &str = "KEYWORD_EXPORTER_";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub log_file: LogFileSection,
    pub remote_write: RemoteWriteSection,
    /// Value of the `instance` label. Defaults to the host's IPv4 address.
    pub instance: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogFileSection {
    pub list: Vec<TrackedFileEntry>,
    /// Freshness window in minutes.
    pub ttl: u64,
    /// Checkpoint interval in minutes.
    pub save: u64,
    /// Rescan interval in minutes.
    pub check: u64,
    pub position_file: PathBuf,
    pub start_at: StartAt,
    pub poll_interval_ms: u64,
    pub max_log_size: usize,
    pub work_queue_size: usize,
    /// Lifetime of cached app names and dying offsets, in minutes.
    pub expiry_ttl: u64,
    /// How often expired entries and idle rate buckets are swept, in minutes.
    pub sweep_interval: u64,
}

impl Default for LogFileSection {
    fn default() -> Self {
        Self {
            list: Vec::new(),
            ttl: 5,
            save: 1,
            check: 1,
            position_file: PathBuf::from("/var/lib/keyword-exporter/position.json"),
            start_at: StartAt::Beginning,
            poll_interval_ms: 250,
            max_log_size: 1024 * 1024,
            work_queue_size: 64,
            expiry_ttl: 60,
            sweep_interval: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TrackedFileEntry {
    #[serde(alias = "appName")]
    pub app_name: String,
    #[serde(alias = "keyWords")]
    pub keywords: Vec<String>,
    #[serde(alias = "resolveKeyWord", default)]
    pub resolved_keywords: Vec<String>,
    #[serde(alias = "filePosition")]
    pub file_path: String,
    #[serde(alias = "rulerName", default)]
    pub rule_name: String,
}

impl From<&TrackedFileEntry> for TrackedFile {
    fn from(e: &TrackedFileEntry) -> Self {
        TrackedFile {
            path: e.file_path.clone(),
            app_name: e.app_name.clone(),
            keywords: e.keywords.clone(),
            resolved_keywords: e.resolved_keywords.clone(),
            rule_name: e.rule_name.clone(),
        }
    }
}

#[derive(Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteWriteSection {
    pub address: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Seconds between rate limiter refills.
    pub rate_interval_secs: u64,
    /// Rate limiter burst.
    pub bucket: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bearer_token: Option<String>,
    pub metric_name: String,
    pub help: String,
    pub retry_interval_secs: u64,
    /// How often firing alarms are re-sent.
    pub resend_interval_secs: u64,
    pub tls_ca_file: Option<PathBuf>,
}

impl Default for RemoteWriteSection {
    fn default() -> Self {
        Self {
            address: "http://localhost:9090/api/v1/write".to_string(),
            timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_interval_secs: 60,
            bucket: 1,
            username: None,
            password: None,
            bearer_token: None,
            metric_name: DEFAULT_METRIC_NAME.to_string(),
            help: DEFAULT_METRIC_HELP.to_string(),
            retry_interval_secs: 10,
            resend_interval_secs: 60,
            tls_ca_file: None,
        }
    }
}

impl std::fmt::Debug for RemoteWriteSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWriteSection")
            .field("address", &self.address)
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("rate_interval_secs", &self.rate_interval_secs)
            .field("bucket", &self.bucket)
            .field("username", &self.username)
            .field("metric_name", &self.metric_name)
            .field("retry_interval_secs", &self.retry_interval_secs)
            .field("resend_interval_secs", &self.resend_interval_secs)
            .finish_non_exhaustive()
    }
}

/// Timer periods driving the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub checkpoint: Duration,
    pub rescan: Duration,
    pub sweep: Duration,
    pub resend: Duration,
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

impl AgentConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, BoxError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()).into());
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("toml") => figment.merge(Toml::file(path)),
                _ => {
                    return Err(format!(
                        "unsupported config file format: {}",
                        path.display()
                    )
                    .into());
                }
            };
        }
        let figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: AgentConfig = match figment.extract() {
            Ok(c) => c,
            Err(e) => return Err(format!("failed to parse config: {}", e).into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BoxError> {
        self.tail_config().validate()?;

        let lf = &self.log_file;
        let rw = &self.remote_write;
        if lf.save == 0 || lf.check == 0 || lf.sweep_interval == 0 {
            return Err("log_file save, check and sweep_interval must be non-zero".into());
        }
        if rw.resend_interval_secs == 0 {
            return Err("remote_write resend_interval_secs must be non-zero".into());
        }
        self.authentication()?;
        Ok(())
    }

    pub fn tail_config(&self) -> TailConfig {
        let lf = &self.log_file;
        TailConfig {
            tracked: lf.list.iter().map(TrackedFile::from).collect(),
            freshness_window: minutes(lf.ttl),
            position_file: lf.position_file.clone(),
            start_at: lf.start_at,
            poll_interval: Duration::from_millis(lf.poll_interval_ms),
            max_log_size: lf.max_log_size,
            work_queue_size: lf.work_queue_size,
            expiry_ttl: minutes(lf.expiry_ttl),
        }
    }

    fn authentication(&self) -> Result<Option<Authentication>, BoxError> {
        let rw = &self.remote_write;
        match (&rw.username, &rw.password, &rw.bearer_token) {
            (None, None, None) => Ok(None),
            (Some(username), Some(password), None) => Ok(Some(Authentication::Basic {
                username: username.clone(),
                password: password.clone(),
            })),
            (None, None, Some(token)) => Ok(Some(Authentication::Bearer(token.clone()))),
            (_, _, Some(_)) => {
                Err("remote_write accepts either basic auth or a bearer token, not both".into())
            }
            _ => Err("remote_write basic auth requires both username and password".into()),
        }
    }

    pub fn remote_write_config(&self) -> Result<RemoteWriteConfig, BoxError> {
        let rw = &self.remote_write;
        Ok(RemoteWriteConfig {
            endpoint: rw.address.clone(),
            timeout: Duration::from_secs(rw.timeout_secs),
            retry_interval: Duration::from_secs(rw.retry_interval_secs),
            user_agent: rw.user_agent.clone(),
            auth: self.authentication()?,
            metric_name: rw.metric_name.clone(),
            help: rw.help.clone(),
            tls_ca_file: rw.tls_ca_file.clone(),
        })
    }

    /// Refill interval and burst of the per-path rate limiter.
    pub fn rate_limit(&self) -> (Duration, u32) {
        (
            Duration::from_secs(self.remote_write.rate_interval_secs),
            self.remote_write.bucket,
        )
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            checkpoint: minutes(self.log_file.save),
            rescan: minutes(self.log_file.check),
            sweep: minutes(self.log_file.sweep_interval),
            resend: Duration::from_secs(self.remote_write.resend_interval_secs),
        }
    }
}
