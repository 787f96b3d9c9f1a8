//! Slurm scheduler interface implementation

use anyhow::{Context, Result};
use log::{error, info, trace};
use regex::Regex;
use std::env;

use super::common::{CommandRetry, JobId, JobState, run_command_with_retries};
use super::job_control::JobControl;
use crate::errors::FlotillaError;
use crate::launcher::JobDescriptor;

const INVALID_JOB_ID: &str = "Invalid job id specified";

/// Slurm scheduler implementation
pub struct SlurmInterface {
    user: String,
    sbatch_regex: Regex,
    retry: CommandRetry,
}

impl SlurmInterface {
    /// Create a new Slurm interface
    pub fn new(retry: CommandRetry) -> Result<Self> {
        let user = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .context("Neither USER nor USERNAME is set")?;
        let sbatch_regex = Regex::new(r"Submitted batch job (\d+)")?;

        Ok(Self {
            user,
            sbatch_regex,
            retry,
        })
    }

    /// Map Slurm status to JobState
    pub fn map_status(slurm_status: &str) -> JobState {
        match slurm_status {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "RESIZING" => JobState::Queued,
            "RUNNING" | "COMPLETING" => JobState::Running,
            "SUSPENDED" | "STOPPED" | "REQUEUE_HOLD" => JobState::Held,
            "COMPLETED" => JobState::Completed,
            "CANCELLED" | "FAILED" | "TIMEOUT" | "NODE_FAIL" | "PREEMPTED" | "OUT_OF_MEMORY"
            | "BOOT_FAIL" | "DEADLINE" => JobState::Removed,
            _ => JobState::Unknown,
        }
    }

    /// Extract the job id from sbatch output
    pub fn parse_job_id(&self, stdout: &str) -> Option<JobId> {
        self.sbatch_regex
            .captures(stdout)
            .and_then(|captures| captures.get(1))
            .map(|m| JobId::from(m.as_str()))
    }

    /// Get the squeue executable path (allows for testing with fake binary)
    fn get_squeue_exec() -> String {
        env::var("FLOTILLA_FAKE_SQUEUE").unwrap_or_else(|_| "squeue".to_string())
    }

    /// Get the sbatch executable path (allows for testing with fake binary)
    fn get_sbatch_exec() -> String {
        env::var("FLOTILLA_FAKE_SBATCH").unwrap_or_else(|_| "sbatch".to_string())
    }

    fn get_scancel_exec() -> String {
        env::var("FLOTILLA_FAKE_SCANCEL").unwrap_or_else(|_| "scancel".to_string())
    }
}

impl JobControl for SlurmInterface {
    fn submit(&self, descriptor: &JobDescriptor) -> crate::errors::Result<JobId> {
        let sbatch = Self::get_sbatch_exec();
        let script = descriptor.script.to_string_lossy();
        let submission_error = |reason: String| FlotillaError::Submission {
            descriptor: descriptor.name.clone(),
            reason,
        };

        let output = run_command_with_retries(
            &sbatch,
            &[script.as_ref()],
            descriptor.working_dir.as_deref(),
            self.retry,
            &[],
        )
        .map_err(|e| submission_error(e.to_string()))?;

        if !output.success() {
            return Err(submission_error(format!(
                "sbatch exited with {}: {}",
                output.return_code,
                output.stderr.trim()
            )));
        }

        match self.parse_job_id(&output.stdout) {
            Some(job_id) => {
                info!("Submitted {} as Slurm job {}", descriptor.name, job_id);
                Ok(job_id)
            }
            None => {
                error!("Failed to parse sbatch output: {}", output.stdout);
                Err(submission_error(
                    "Failed to parse job ID from sbatch output".to_string(),
                ))
            }
        }
    }

    fn status(&self, job_id: &JobId) -> crate::errors::Result<JobState> {
        let squeue = Self::get_squeue_exec();
        let query_error = |reason: String| FlotillaError::SchedulerQuery {
            job_id: job_id.to_string(),
            reason,
        };

        // Liveness queries must stay short, so only one attempt here.
        let output = run_command_with_retries(
            &squeue,
            &["-u", &self.user, "-h", "-j", job_id.as_str(), "-o", "%T"],
            None,
            CommandRetry::once(),
            &[INVALID_JOB_ID],
        )
        .map_err(|e| query_error(e.to_string()))?;

        if !output.success() {
            if output.mentions(INVALID_JOB_ID) {
                return Ok(JobState::Unknown);
            }
            return Err(query_error(format!(
                "squeue command failed: {} - {}",
                output.return_code,
                output.stderr.trim()
            )));
        }

        trace!("squeue output: [{}]", output.stdout);
        match output.stdout.split_whitespace().next() {
            // No longer in the queue
            None => Ok(JobState::Unknown),
            Some(state) => Ok(Self::map_status(state)),
        }
    }

    fn kill(&self, job_id: &JobId) -> crate::errors::Result<()> {
        let scancel = Self::get_scancel_exec();
        let output = run_command_with_retries(
            &scancel,
            &[job_id.as_str()],
            None,
            self.retry,
            &[INVALID_JOB_ID],
        )
        .map_err(|e| FlotillaError::SchedulerQuery {
            job_id: job_id.to_string(),
            reason: e.to_string(),
        })?;

        if output.success() || output.mentions(INVALID_JOB_ID) {
            info!("Canceled Slurm job {}", job_id);
            Ok(())
        } else {
            error!("Failed to cancel Slurm job {}: {}", job_id, output.stderr);
            Err(FlotillaError::SchedulerQuery {
                job_id: job_id.to_string(),
                reason: format!("scancel exited with {}", output.return_code),
            })
        }
    }
}
