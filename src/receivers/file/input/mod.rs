// SPDX-License-Identifier: Apache-2.0

pub mod file_id;
pub mod finder;
pub mod follower;

pub use file_id::FileId;
pub use finder::{DirectoryScanner, ScannedFile};
pub use follower::{FileFollower, StartPosition};

use serde::Deserialize;

/// Where a file with no recorded offset starts being read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartAt {
    #[default]
    Beginning,
    End,
}
