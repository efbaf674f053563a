// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmStatus {
    Firing,
    Resolved,
}

/// Firing/resolved flag per application. Every configured application starts
/// out resolved.
#[derive(Debug, Default)]
pub struct AlarmTracker {
    status: Mutex<HashMap<String, AlarmStatus>>,
}

impl AlarmTracker {
    pub fn new<'a>(apps: impl IntoIterator<Item = &'a str>) -> Self {
        let status = apps
            .into_iter()
            .map(|app| (app.to_string(), AlarmStatus::Resolved))
            .collect();
        Self {
            status: Mutex::new(status),
        }
    }

    pub fn mark_firing(&self, app: &str) {
        self.transition(app, AlarmStatus::Firing);
    }

    pub fn mark_resolved(&self, app: &str) {
        self.transition(app, AlarmStatus::Resolved);
    }

    fn transition(&self, app: &str, next: AlarmStatus) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        let prev = status.insert(app.to_string(), next);
        if prev != Some(next) {
            info!(app, status = ?next, "Alarm status changed.");
        }
    }

    pub fn status(&self, app: &str) -> Option<AlarmStatus> {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(app)
            .copied()
    }

    /// Applications currently firing, sorted by name.
    pub fn firing(&self) -> Vec<String> {
        let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        let mut apps: Vec<_> = status
            .iter()
            .filter(|(_, s)| **s == AlarmStatus::Firing)
            .map(|(app, _)| app.clone())
            .collect();
        apps.sort();
        apps
    }

    pub fn for_each_firing(&self, mut f: impl FnMut(&str)) {
        for app in self.firing() {
            f(&app);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_resolved_and_toggles() {
        let alarms = AlarmTracker::new(["api", "worker"]);
        assert_eq!(Some(AlarmStatus::Resolved), alarms.status("api"));
        assert!(alarms.firing().is_empty());

        alarms.mark_firing("worker");
        alarms.mark_firing("api");
        assert_eq!(vec!["api", "worker"], alarms.firing());

        alarms.mark_resolved("api");
        let mut seen = Vec::new();
        alarms.for_each_firing(|app| seen.push(app.to_string()));
        assert_eq!(vec!["worker"], seen);
    }
}
