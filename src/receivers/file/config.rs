// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::StartAt;

/// One configured log source and the rules applied to its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Literal path or glob pattern.
    pub path: String,
    pub app_name: String,
    pub keywords: Vec<String>,
    /// Keywords that clear a firing alarm. Empty disables alarm tracking.
    pub resolved_keywords: Vec<String>,
    pub rule_name: String,
}

impl TrackedFile {
    pub fn tracks_alarms(&self) -> bool {
        !self.resolved_keywords.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(Error::Config(format!(
                "tracked file {} has no application name",
                self.path
            )));
        }
        if self.path.trim().is_empty() {
            return Err(Error::Config(format!(
                "application {} has no file path",
                self.app_name
            )));
        }
        if self.keywords.iter().all(|k| k.is_empty()) {
            return Err(Error::Config(format!(
                "application {} has no keywords",
                self.app_name
            )));
        }
        Ok(())
    }
}

/// Settings shared by the scanner, the tail manager and its tasks.
#[derive(Debug, Clone)]
pub struct TailConfig {
    pub tracked: Vec<TrackedFile>,
    /// Files not modified within this window are ignored by the scanner.
    pub freshness_window: Duration,
    pub position_file: PathBuf,
    pub start_at: StartAt,
    pub poll_interval: Duration,
    pub max_log_size: usize,
    pub work_queue_size: usize,
    /// Lifetime of app-name lookups and dying offsets.
    pub expiry_ttl: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            tracked: Vec::new(),
            freshness_window: Duration::from_secs(5 * 60),
            position_file: PathBuf::from("/var/lib/keyword-exporter/position.json"),
            start_at: StartAt::Beginning,
            poll_interval: Duration::from_millis(250),
            max_log_size: 1024 * 1024,
            work_queue_size: 64,
            expiry_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl TailConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tracked.is_empty() {
            return Err(Error::Config("no tracked files configured".to_string()));
        }
        let mut names = std::collections::HashSet::new();
        for tracked in &self.tracked {
            tracked.validate()?;
            if !names.insert(tracked.app_name.as_str()) {
                return Err(Error::Config(format!(
                    "application {} is configured more than once",
                    tracked.app_name
                )));
            }
        }
        if self.freshness_window.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::Config(
                "freshness window and poll interval must be non-zero".to_string(),
            ));
        }
        if self.work_queue_size == 0 {
            return Err(Error::Config("work queue size must be non-zero".to_string()));
        }
        Ok(())
    }
}
