//! Types shared by the scheduler backends

use anyhow::Result;
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

/// Scheduler-assigned job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        JobId(value)
    }
}

/// Job state as reported by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Held,
    Completed,
    Removed,
    /// The scheduler does not know the job (never existed or already purged)
    Unknown,
}

impl JobState {
    /// Whether the job still occupies the scheduler's queue.
    pub fn is_alive(self) -> bool {
        matches!(self, JobState::Queued | JobState::Running | JobState::Held)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    #[default]
    Condor,
    Slurm,
}

impl fmt::Display for SchedulerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerType::Condor => f.write_str("condor"),
            SchedulerType::Slurm => f.write_str("slurm"),
        }
    }
}

/// Retry settings for scheduler CLI invocations
#[derive(Debug, Clone, Copy)]
pub struct CommandRetry {
    pub attempts: usize,
    pub delay: Duration,
}

impl CommandRetry {
    pub fn new(attempts: usize, delay_secs: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            delay: Duration::from_secs(delay_secs),
        }
    }

    /// A single attempt, used for queries that must return quickly.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for CommandRetry {
    fn default() -> Self {
        Self::new(6, 10)
    }
}

/// Captured result of one scheduler command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }

    /// True if either stream mentions `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }
}

/// Run a command with retries for transient errors.
///
/// Returns the last attempt's output once the command succeeds, reports one of
/// `ignore_errors`, or runs out of attempts. Only a failure to spawn the process
/// is an `Err`.
pub fn run_command_with_retries(
    cmd: &str,
    args: &[&str],
    cwd: Option<&Path>,
    retry: CommandRetry,
    ignore_errors: &[&str],
) -> Result<CommandOutput> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        trace!("Running command: {} {:?} (attempt {})", cmd, args, attempts);

        let mut command = Command::new(cmd);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        let output = command.output()?;

        let result = CommandOutput {
            return_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        let should_ignore = ignore_errors.iter().any(|err| result.mentions(err));
        if result.success() || should_ignore || attempts >= retry.attempts {
            return Ok(result);
        }

        warn!(
            "Command failed (attempt {}/{}): {} {} - {}",
            attempts,
            retry.attempts,
            cmd,
            result.return_code,
            result.stderr.trim()
        );
        thread::sleep(retry.delay);
    }
}
