// SPDX-License-Identifier: Apache-2.0

//! On-disk format of the position file.
//!
//! The file is a single JSON object keyed by application name:
//!
//! ```json
//! { "api": { "offset": 1024, "appName": "api", "fileName": "/var/log/api.log" } }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type PositionMap = HashMap<String, FileOffset>;

/// Last read position of one application's current file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOffset {
    pub offset: u64,
    pub app_name: String,
    pub file_name: String,
}

impl FileOffset {
    pub fn new(app_name: impl Into<String>, file_name: impl Into<String>, offset: u64) -> Self {
        Self {
            offset,
            app_name: app_name.into(),
            file_name: file_name.into(),
        }
    }
}

/// Fold `incoming` into `positions`.
///
/// The stored offset for an (application, file) pair never decreases. An
/// entry for a different file replaces the application's record outright.
/// Returns true if the map changed.
pub fn merge(positions: &mut PositionMap, incoming: FileOffset) -> bool {
    match positions.get(&incoming.app_name) {
        Some(current)
            if current.file_name == incoming.file_name && current.offset >= incoming.offset =>
        {
            false
        }
        _ => {
            positions.insert(incoming.app_name.clone(), incoming);
            true
        }
    }
}
