// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

/// A keyword hit on one line of a tailed file.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    pub app_name: String,
    pub file_name: String,
    /// The keyword that matched. Re-sent alarms carry every configured keyword, comma joined.
    pub matched_keyword: String,
    pub rule_name: String,
    pub host_ip: String,
    pub timestamp: SystemTime,
}

/// Hands match events to a sender that delivers them in the background.
///
/// Implementations must not block the caller; a tail task calls this inline
/// for every allowed match.
pub trait AlertDispatch: Send + Sync {
    fn dispatch(&self, event: MatchEvent);
}
