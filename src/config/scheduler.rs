//! Scheduler backend configuration

use serde::{Deserialize, Serialize};

use crate::scheduler::SchedulerType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Which scheduler CLI to drive
    #[serde(rename = "type")]
    pub scheduler_type: SchedulerType,

    /// Attempts per scheduler command before giving up
    pub command_retries: usize,

    /// Seconds between retries of a failed scheduler command
    pub retry_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_type: SchedulerType::Condor,
            command_retries: 6,
            retry_delay_secs: 10,
        }
    }
}

impl SchedulerConfig {
    pub(super) fn validate(&self, errors: &mut Vec<String>) {
        if self.command_retries == 0 {
            errors.push("scheduler.command_retries must be at least 1".to_string());
        }
    }
}
