// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Position store error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("No tracked application named {0}")]
    UnknownApp(String),

    #[error("Tail task already running for {0}")]
    AlreadyTailing(PathBuf),

    #[error("Tail supervisor queue closed")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;
