//! Workflow monitor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the background watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds to sleep between idle watcher iterations
    pub status_check_interval_secs: f64,

    /// Upper bound for each receive call. Keep small: it bounds stop latency.
    pub receive_timeout_secs: f64,

    /// Topic carrying workflow status and command events
    pub status_topic: String,

    /// Topic carrying logger lifecycle events
    pub logger_topic: String,

    /// Topic on which the end-of-life event is published to the loggers
    pub control_topic: String,

    /// Location of the event broker (spool directory for the file broker)
    pub event_broker: Option<String>,

    /// Age after which consumed spool events are deleted
    pub event_retention_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            status_check_interval_secs: 5.0,
            receive_timeout_secs: 1.0,
            status_topic: "flotilla.monitor".to_string(),
            logger_topic: "logger.status".to_string(),
            control_topic: "logging".to_string(),
            event_broker: None,
            event_retention_secs: 600.0,
        }
    }
}

impl MonitorConfig {
    pub fn status_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.status_check_interval_secs.max(0.0))
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.receive_timeout_secs.max(0.0))
    }

    pub fn event_retention(&self) -> Duration {
        Duration::from_secs_f64(self.event_retention_secs.max(0.0))
    }

    pub(super) fn validate(&self, errors: &mut Vec<String>) {
        if !(self.status_check_interval_secs >= 0.0) {
            errors.push(format!(
                "monitor.status_check_interval_secs must be >= 0, got {}",
                self.status_check_interval_secs
            ));
        }
        if !(self.receive_timeout_secs > 0.0 && self.receive_timeout_secs <= 10.0) {
            errors.push(format!(
                "monitor.receive_timeout_secs must be in (0, 10], got {}",
                self.receive_timeout_secs
            ));
        }
        if !(self.event_retention_secs > 0.0) {
            errors.push(format!(
                "monitor.event_retention_secs must be > 0, got {}",
                self.event_retention_secs
            ));
        }
        for (name, topic) in [
            ("status_topic", &self.status_topic),
            ("logger_topic", &self.logger_topic),
            ("control_topic", &self.control_topic),
        ] {
            if topic.trim().is_empty() {
                errors.push(format!("monitor.{} must not be empty", name));
            }
        }
    }
}
