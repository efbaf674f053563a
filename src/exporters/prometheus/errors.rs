// SPDX-License-Identifier: Apache-2.0

use http::StatusCode;
use thiserror::Error;
use tower::BoxError;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("invalid remote write configuration: {0}")]
    Config(String),

    #[error("failed to compress write request: {0}")]
    Compress(#[from] snap::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("remote write transport error: {0}")]
    Transport(BoxError),

    #[error("remote write rejected with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("remote write request timed out")]
    Timeout,

    #[error("remote write abandoned after {attempts} attempts")]
    RetriesExhausted { attempts: usize },
}
