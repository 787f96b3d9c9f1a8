//! HTCondor scheduler interface implementation

use anyhow::Result;
use log::{debug, error, info, trace};
use regex::Regex;
use std::env;

use super::common::{CommandOutput, CommandRetry, JobId, JobState, run_command_with_retries};
use super::job_control::JobControl;
use crate::errors::FlotillaError;
use crate::launcher::JobDescriptor;

const NOT_FOUND_ERRORS: [&str; 2] = ["Couldn't find", "not found"];

/// HTCondor scheduler implementation
///
/// Jobs are tracked by cluster id; every submitted descriptor is expected to
/// queue a single process (`<cluster>.0`).
pub struct CondorInterface {
    submit_regex: Regex,
    retry: CommandRetry,
}

impl CondorInterface {
    pub fn new(retry: CommandRetry) -> Result<Self> {
        let submit_regex = Regex::new(r"submitted to cluster (\d+)")?;
        Ok(Self {
            submit_regex,
            retry,
        })
    }

    /// Map a numeric `JobStatus` ClassAd value to JobState
    pub fn map_status(code: &str) -> JobState {
        match code.trim() {
            "1" => JobState::Queued,
            "2" | "6" => JobState::Running,
            "3" => JobState::Removed,
            "4" => JobState::Completed,
            "5" | "7" => JobState::Held,
            _ => JobState::Unknown,
        }
    }

    pub fn parse_cluster_id(&self, stdout: &str) -> Option<JobId> {
        self.submit_regex
            .captures(stdout)
            .and_then(|captures| captures.get(1))
            .map(|m| JobId::from(m.as_str()))
    }

    fn exec(var: &str, default: &str) -> String {
        env::var(var).unwrap_or_else(|_| default.to_string())
    }

    fn query_status(
        &self,
        tool: &str,
        args: &[&str],
        job_id: &JobId,
    ) -> crate::errors::Result<Option<JobState>> {
        let output = run_command_with_retries(tool, args, None, CommandRetry::once(), &[])
            .map_err(|e| query_error(job_id, e.to_string()))?;
        if !output.success() {
            return Err(query_error(
                job_id,
                format!(
                    "{} exited with {}: {}",
                    tool,
                    output.return_code,
                    output.stderr.trim()
                ),
            ));
        }
        trace!("{} output: [{}]", tool, output.stdout);
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(Self::map_status))
    }
}

fn query_error(job_id: &JobId, reason: String) -> FlotillaError {
    FlotillaError::SchedulerQuery {
        job_id: job_id.to_string(),
        reason,
    }
}

fn is_not_found(output: &CommandOutput) -> bool {
    NOT_FOUND_ERRORS.iter().any(|needle| output.mentions(needle))
}

impl JobControl for CondorInterface {
    fn submit(&self, descriptor: &JobDescriptor) -> crate::errors::Result<JobId> {
        let condor_submit = Self::exec("FLOTILLA_FAKE_CONDOR_SUBMIT", "condor_submit");
        let script = descriptor.script.to_string_lossy();
        let submission_error = |reason: String| FlotillaError::Submission {
            descriptor: descriptor.name.clone(),
            reason,
        };

        // condor_submit resolves relative paths in the submit file against its cwd
        let output = run_command_with_retries(
            &condor_submit,
            &[script.as_ref()],
            descriptor.working_dir.as_deref(),
            self.retry,
            &[],
        )
        .map_err(|e| submission_error(e.to_string()))?;

        if !output.success() {
            return Err(submission_error(format!(
                "condor_submit exited with {}: {}",
                output.return_code,
                output.stderr.trim()
            )));
        }

        match self.parse_cluster_id(&output.stdout) {
            Some(job_id) => {
                info!("Submitted {} as HTCondor cluster {}", descriptor.name, job_id);
                Ok(job_id)
            }
            None => {
                error!("Failed to parse condor_submit output: {}", output.stdout);
                Err(submission_error(
                    "Failed to parse cluster id from condor_submit output".to_string(),
                ))
            }
        }
    }

    fn status(&self, job_id: &JobId) -> crate::errors::Result<JobState> {
        let condor_q = Self::exec("FLOTILLA_FAKE_CONDOR_Q", "condor_q");
        if let Some(state) =
            self.query_status(&condor_q, &[job_id.as_str(), "-af", "JobStatus"], job_id)?
        {
            return Ok(state);
        }

        // Gone from the queue: the history tells us whether it finished or was removed.
        debug!("cluster {} not in queue, checking history", job_id);
        let condor_history = Self::exec("FLOTILLA_FAKE_CONDOR_HISTORY", "condor_history");
        let state = self
            .query_status(
                &condor_history,
                &[job_id.as_str(), "-af", "JobStatus", "-limit", "1"],
                job_id,
            )?
            .unwrap_or(JobState::Unknown);
        Ok(state)
    }

    fn kill(&self, job_id: &JobId) -> crate::errors::Result<()> {
        let condor_rm = Self::exec("FLOTILLA_FAKE_CONDOR_RM", "condor_rm");
        let output = run_command_with_retries(
            &condor_rm,
            &[job_id.as_str()],
            None,
            self.retry,
            &NOT_FOUND_ERRORS,
        )
        .map_err(|e| query_error(job_id, e.to_string()))?;

        if output.success() {
            info!("Removed HTCondor cluster {}", job_id);
            Ok(())
        } else if is_not_found(&output) {
            debug!("HTCondor cluster {} already gone", job_id);
            Ok(())
        } else {
            error!("Failed to remove HTCondor cluster {}: {}", job_id, output.stderr);
            Err(query_error(
                job_id,
                format!("condor_rm exited with {}", output.return_code),
            ))
        }
    }
}
