// SPDX-License-Identifier: Apache-2.0

use crate::exporters::prometheus::proto::Label;
use crate::receivers::file::MatchEvent;

pub const METRIC_NAME_LABEL: &str = "__name__";
pub const APP_NAME_LABEL: &str = "app_name";
pub const LOG_POSITION_LABEL: &str = "log_position";
pub const INSTANCE_LABEL: &str = "instance";
pub const KEYWORDS_LABEL: &str = "keywords";
pub const RULE_NAME_LABEL: &str = "rulerName";

/// Builds the label set attached to an alert sample.
#[derive(Debug, Clone, Default)]
pub struct AlertLabels {
    labels: Vec<Label>,
}

impl AlertLabels {
    pub fn new(app_name: &str, log_position: &str, instance: &str) -> Self {
        Self {
            labels: vec![
                Label::new(APP_NAME_LABEL, app_name),
                Label::new(LOG_POSITION_LABEL, log_position),
                Label::new(INSTANCE_LABEL, instance),
            ],
        }
    }

    /// Add a label whose values are joined with commas. Empty value lists are skipped.
    pub fn with_values<S: AsRef<str>>(mut self, name: &str, values: &[S]) -> Self {
        if values.is_empty() {
            return self;
        }
        let joined = values
            .iter()
            .map(|v| v.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        self.labels.push(Label::new(name, joined));
        self
    }

    pub fn from_event(event: &MatchEvent) -> Self {
        Self::new(&event.app_name, &event.file_name, &event.host_ip)
            .with_values(KEYWORDS_LABEL, &[event.matched_keyword.as_str()])
            .with_values(RULE_NAME_LABEL, &[event.rule_name.as_str()])
    }

    /// Labels sorted by name, the order remote-write receivers expect.
    pub fn into_labels(mut self) -> Vec<Label> {
        self.labels.sort_by(|a, b| a.name.cmp(&b.name));
        self.labels.dedup_by(|a, b| a.name == b.name);
        self.labels
    }
}
