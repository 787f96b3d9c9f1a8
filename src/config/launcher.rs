//! Launch sequencing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for phase gating during launch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Skip the bootstrap phase (resources are pre-provisioned)
    pub skip_bootstrap: bool,

    /// Seconds between scheduler queries while waiting for jobs to run
    pub running_poll_interval_secs: f64,

    /// Give up waiting for a job to run after this many seconds (unbounded if unset)
    pub running_timeout_secs: Option<f64>,

    /// Seconds between checks for readiness artifacts
    pub readiness_poll_interval_secs: f64,

    /// Give up waiting for readiness artifacts after this many seconds (unbounded if unset)
    pub readiness_timeout_secs: Option<f64>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            skip_bootstrap: false,
            running_poll_interval_secs: 10.0,
            running_timeout_secs: None,
            readiness_poll_interval_secs: 2.0,
            readiness_timeout_secs: None,
        }
    }
}

impl LauncherConfig {
    pub fn running_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.running_poll_interval_secs.max(0.0))
    }

    pub fn running_timeout(&self) -> Option<Duration> {
        self.running_timeout_secs
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.readiness_poll_interval_secs.max(0.0))
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }

    pub(super) fn validate(&self, errors: &mut Vec<String>) {
        if !(self.running_poll_interval_secs > 0.0) {
            errors.push(format!(
                "launcher.running_poll_interval_secs must be > 0, got {}",
                self.running_poll_interval_secs
            ));
        }
        if !(self.readiness_poll_interval_secs > 0.0) {
            errors.push(format!(
                "launcher.readiness_poll_interval_secs must be > 0, got {}",
                self.readiness_poll_interval_secs
            ));
        }
        if let Some(secs) = self.running_timeout_secs
            && secs <= 0.0
        {
            errors.push(format!(
                "launcher.running_timeout_secs must be > 0, got {}",
                secs
            ));
        }
        if let Some(secs) = self.readiness_timeout_secs
            && secs <= 0.0
        {
            errors.push(format!(
                "launcher.readiness_timeout_secs must be > 0, got {}",
                secs
            ));
        }
    }
}
