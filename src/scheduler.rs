//! Scheduler job control
//!
//! This module provides the [`JobControl`] abstraction the launcher and monitor
//! use to drive an external cluster scheduler through its command-line tools,
//! and concrete implementations for HTCondor and Slurm.

pub mod common;
pub mod condor_interface;
pub mod job_control;
pub mod slurm_interface;

pub use common::{CommandOutput, CommandRetry, JobId, JobState, SchedulerType};
pub use condor_interface::CondorInterface;
pub use job_control::{JobControl, WaitPolicy};
pub use slurm_interface::SlurmInterface;

use anyhow::Result;
use std::sync::Arc;

use crate::config::SchedulerConfig;

/// Factory function to create a job control backend from configuration
pub fn create_job_control(config: &SchedulerConfig) -> Result<Arc<dyn JobControl>> {
    let retry = CommandRetry::new(config.command_retries, config.retry_delay_secs);
    match config.scheduler_type {
        SchedulerType::Condor => Ok(Arc::new(CondorInterface::new(retry)?)),
        SchedulerType::Slurm => Ok(Arc::new(SlurmInterface::new(retry)?)),
    }
}
