use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::common::{JobId, JobState};
use crate::clock::{Clock, Deadline, system_clock};
use crate::errors::{FlotillaError, Result};
use crate::launcher::JobDescriptor;

/// How long and how often to poll while waiting on the scheduler
#[derive(Clone)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub clock: Arc<dyn Clock>,
}

impl WaitPolicy {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for WaitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitPolicy")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Submit, query and kill jobs on an external scheduler.
pub trait JobControl: Send + Sync {
    /// Submit a prepared job. Fails with [`FlotillaError::Submission`].
    fn submit(&self, descriptor: &JobDescriptor) -> Result<JobId>;

    /// Query the job's state. Fails with [`FlotillaError::SchedulerQuery`].
    fn status(&self, job_id: &JobId) -> Result<JobState>;

    /// Remove the job from the scheduler. Killing an unknown job is not an error.
    fn kill(&self, job_id: &JobId) -> Result<()>;

    /// Whether the job is still queued or running. Unknown jobs are not alive.
    fn is_alive(&self, job_id: &JobId) -> Result<bool> {
        Ok(self.status(job_id)?.is_alive())
    }

    /// Block until the scheduler reports the job running.
    fn wait_for_running(&self, job_id: &JobId, policy: &WaitPolicy) -> Result<()> {
        self.wait_for_all_running(std::slice::from_ref(job_id), policy)
    }

    /// Block until every job in `job_ids` has been seen running.
    ///
    /// A job that completes between polls counts as having run. A job that is
    /// removed before it ever ran fails the wait.
    fn wait_for_all_running(&self, job_ids: &[JobId], policy: &WaitPolicy) -> Result<()> {
        let clock = policy.clock.as_ref();
        let deadline = Deadline::new(clock, policy.timeout);
        let mut pending: BTreeSet<&JobId> = job_ids.iter().collect();

        loop {
            let mut started = Vec::new();
            for job_id in &pending {
                match self.status(job_id) {
                    Ok(JobState::Running) => started.push(*job_id),
                    Ok(JobState::Completed) => {
                        debug!("job_id={} completed before it was seen running", job_id);
                        started.push(*job_id);
                    }
                    Ok(JobState::Removed) => {
                        return Err(FlotillaError::Submission {
                            descriptor: job_id.to_string(),
                            reason: "job was removed before it started running".to_string(),
                        });
                    }
                    Ok(state) => debug!("job_id={} state={:?}", job_id, state),
                    Err(e) => warn!("Status query failed while waiting for job to run: {}", e),
                }
            }
            for job_id in started {
                info!("job_id={} is running", job_id);
                pending.remove(job_id);
            }

            if pending.is_empty() {
                return Ok(());
            }
            if deadline.expired(clock) {
                let waiting: Vec<String> = pending.iter().map(|id| id.to_string()).collect();
                return Err(FlotillaError::ReadinessTimeout {
                    what: format!("job(s) {} to start running", waiting.join(", ")),
                    waited: deadline.elapsed(clock),
                });
            }
            clock.sleep(policy.poll_interval);
        }
    }
}
