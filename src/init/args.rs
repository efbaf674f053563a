// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Config file (.json, .yaml or .toml)
    #[arg(short, long, env = "KEYWORD_EXPORTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write logs to this file instead of stdout
    #[arg(long, env = "KEYWORD_EXPORTER_LOG_PATH")]
    pub log_path: Option<PathBuf>,

    /// Seconds to wait for tasks to finish on shutdown
    #[arg(long, env = "KEYWORD_EXPORTER_SHUTDOWN_TIMEOUT", default_value = "10")]
    pub shutdown_timeout_secs: u64,
}
