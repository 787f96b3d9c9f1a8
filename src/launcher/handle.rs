use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use crate::events::WorkflowRunId;
use crate::monitor::{StopUrgency, WorkflowMonitor};
use crate::scheduler::{JobControl, JobId};

/// A launched workflow: its jobs and its live monitor.
///
/// Cheap to clone; every clone controls the same workflow.
#[derive(Clone)]
pub struct WorkflowHandle {
    run_id: WorkflowRunId,
    monitor: Arc<WorkflowMonitor>,
    job_control: Arc<dyn JobControl>,
    bootstrap_job: Option<JobId>,
    coordinator_job: JobId,
    worker_jobs: Vec<JobId>,
}

impl WorkflowHandle {
    pub(crate) fn new(
        run_id: WorkflowRunId,
        monitor: Arc<WorkflowMonitor>,
        job_control: Arc<dyn JobControl>,
        bootstrap_job: Option<JobId>,
        coordinator_job: JobId,
        worker_jobs: Vec<JobId>,
    ) -> Self {
        WorkflowHandle {
            run_id,
            monitor,
            job_control,
            bootstrap_job,
            coordinator_job,
            worker_jobs,
        }
    }

    pub fn run_id(&self) -> &WorkflowRunId {
        &self.run_id
    }

    pub fn monitor(&self) -> &Arc<WorkflowMonitor> {
        &self.monitor
    }

    pub fn bootstrap_job(&self) -> Option<&JobId> {
        self.bootstrap_job.as_ref()
    }

    pub fn coordinator_job(&self) -> &JobId {
        &self.coordinator_job
    }

    pub fn worker_jobs(&self) -> &[JobId] {
        &self.worker_jobs
    }

    /// Every submitted job, in submission order.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.bootstrap_job
            .iter()
            .chain(std::iter::once(&self.coordinator_job))
            .chain(self.worker_jobs.iter())
            .cloned()
            .collect()
    }

    pub fn stop(&self, urgency: StopUrgency) {
        self.monitor.stop(urgency);
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        self.monitor.wait_for_completion(timeout)
    }

    /// Kill every job of the workflow, workers first. Failures are logged.
    pub fn kill_all(&self) {
        info!("Killing all jobs of workflow run_id={}", self.run_id);
        let mut jobs = self.job_ids();
        jobs.reverse();
        for job_id in &jobs {
            if let Err(e) = self.job_control.kill(job_id) {
                error!("Failed to kill job {}: {}", job_id, e);
            }
        }
    }
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("run_id", &self.run_id)
            .field("bootstrap_job", &self.bootstrap_job)
            .field("coordinator_job", &self.coordinator_job)
            .field("worker_jobs", &self.worker_jobs)
            .finish()
    }
}
