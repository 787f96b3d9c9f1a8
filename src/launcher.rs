//! Phased workflow launch
//!
//! [`WorkflowLauncher::launch`] runs three strictly ordered phases, each
//! blocking until its jobs are ready:
//!
//! 1. **Bootstrap** (optional): one infrastructure job, e.g. a glide-in
//!    request. Waits until it is running. Skipped when the plan or the
//!    configuration says the resources are already provisioned.
//! 2. **Coordinator**: one job. Waits until it is running, then until its
//!    first artifact exists, because a running coordinator is not necessarily
//!    accepting connections yet.
//! 3. **Fan-out**: every worker is submitted without waiting in between; then
//!    the launcher waits once for all of them to run and once for all
//!    artifacts.
//!
//! A failed submission or an expired wait aborts the launch. Jobs already
//! submitted are not rolled back; they are listed in the returned
//! [`LaunchError`] so the caller can [`WorkflowLauncher::reap`] them. While a
//! launch is still blocked in a wait, [`WorkflowLauncher::submitted_jobs`]
//! gives the same list to another thread, e.g. a signal handler.

mod handle;
mod job_record;
mod plan;

pub use handle::WorkflowHandle;
pub use job_record::write_job_record;
pub use plan::{JobDescriptor, LaunchPlan};

use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::clock::{Clock, system_clock};
use crate::config::FlotillaConfig;
use crate::errors::{FlotillaError, LaunchError};
use crate::events::EventChannel;
use crate::monitor::{StatusListener, ThreadSpawner, WatcherSpawner, WorkflowMonitor};
use crate::readiness::ReadinessWaiter;
use crate::scheduler::{JobControl, JobId, WaitPolicy};

pub struct WorkflowLauncher {
    job_control: Arc<dyn JobControl>,
    readiness: Arc<dyn ReadinessWaiter>,
    channel: Arc<dyn EventChannel>,
    config: FlotillaConfig,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn WatcherSpawner>,
    listeners: Vec<Arc<dyn StatusListener>>,
    in_flight: Mutex<Vec<JobId>>,
}

/// Jobs submitted so far, so a failure can report them.
struct Submitted<'a> {
    jobs: Vec<JobId>,
    shared: &'a Mutex<Vec<JobId>>,
}

impl<'a> Submitted<'a> {
    fn new(shared: &'a Mutex<Vec<JobId>>) -> Self {
        shared.lock().clear();
        Submitted {
            jobs: Vec::new(),
            shared,
        }
    }

    fn push(&mut self, job_id: JobId) {
        self.shared.lock().push(job_id.clone());
        self.jobs.push(job_id);
    }

    fn fail(&self, error: FlotillaError) -> LaunchError {
        error!("Workflow launch failed: {}", error);
        LaunchError::new(error, self.jobs.clone())
    }
}

impl WorkflowLauncher {
    pub fn new(
        job_control: Arc<dyn JobControl>,
        readiness: Arc<dyn ReadinessWaiter>,
        channel: Arc<dyn EventChannel>,
        config: FlotillaConfig,
    ) -> Self {
        WorkflowLauncher {
            job_control,
            readiness,
            channel,
            config,
            clock: system_clock(),
            spawner: Arc::new(ThreadSpawner),
            listeners: Vec::new(),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Clock used for scheduler polling and by the monitor's watcher.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WatcherSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Listener attached to every monitor this launcher creates.
    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            self.config.launcher.running_poll_interval(),
            self.config.launcher.running_timeout(),
        )
        .with_clock(Arc::clone(&self.clock))
    }

    fn submit(
        &self,
        descriptor: &JobDescriptor,
        submitted: &mut Submitted<'_>,
    ) -> Result<JobId, LaunchError> {
        let job_id = self
            .job_control
            .submit(descriptor)
            .map_err(|e| submitted.fail(e))?;
        submitted.push(job_id.clone());

        // Advisory only; a missing record must not abort a live launch.
        if let Err(e) = write_job_record(&job_id, &descriptor.record_path()) {
            warn!("{}", e);
        }
        Ok(job_id)
    }

    /// Launch `plan` and return a handle to the running, monitored workflow.
    pub fn launch(&self, plan: &LaunchPlan) -> Result<WorkflowHandle, LaunchError> {
        let mut submitted = Submitted::new(&self.in_flight);
        plan.validate().map_err(|e| LaunchError::new(e, Vec::new()))?;
        let policy = self.wait_policy();
        info!(
            "Launching workflow run_id={} workers={} loggers={:?}",
            plan.run_id,
            plan.workers.len(),
            plan.loggers
        );

        // Phase 1: bootstrap
        let skip_bootstrap = plan.skip_bootstrap || self.config.launcher.skip_bootstrap;
        let bootstrap_job = match (&plan.bootstrap, skip_bootstrap) {
            (Some(bootstrap), false) => {
                info!(
                    "Submitting bootstrap job {}; this might take a few minutes",
                    bootstrap.name
                );
                let job_id = self.submit(bootstrap, &mut submitted)?;
                self.job_control
                    .wait_for_running(&job_id, &policy)
                    .map_err(|e| submitted.fail(e))?;
                Some(job_id)
            }
            (Some(_), true) => {
                info!("Skipping bootstrap phase as requested");
                None
            }
            (None, _) => None,
        };

        // Phase 2: coordinator
        info!("Submitting coordinator job {}", plan.coordinator.name);
        let coordinator_job = self.submit(&plan.coordinator, &mut submitted)?;
        self.job_control
            .wait_for_running(&coordinator_job, &policy)
            .map_err(|e| submitted.fail(e))?;
        self.readiness
            .wait_for_first()
            .map_err(|e| submitted.fail(e))?;
        info!("Coordinator job {} is ready", coordinator_job);

        // Phase 3: fan-out
        let mut worker_jobs = Vec::with_capacity(plan.workers.len());
        for worker in &plan.workers {
            worker_jobs.push(self.submit(worker, &mut submitted)?);
        }
        info!(
            "Submitted {} worker job(s); waiting for them to run",
            worker_jobs.len()
        );
        self.job_control
            .wait_for_all_running(&worker_jobs, &policy)
            .map_err(|e| submitted.fail(e))?;
        self.readiness
            .wait_for_all()
            .map_err(|e| submitted.fail(e))?;

        let monitor = WorkflowMonitor::new(
            plan.run_id.clone(),
            coordinator_job.clone(),
            Arc::clone(&self.channel),
            Arc::clone(&self.job_control),
            plan.loggers.iter().copied(),
            self.config.monitor.clone(),
        )
        .with_clock(Arc::clone(&self.clock))
        .with_spawner(Arc::clone(&self.spawner));
        for listener in &self.listeners {
            monitor.add_status_listener(Arc::clone(listener));
        }
        let monitor = Arc::new(monitor);
        monitor.start().map_err(|e| submitted.fail(e))?;

        info!("Workflow run_id={} launched", plan.run_id);
        Ok(WorkflowHandle::new(
            plan.run_id.clone(),
            monitor,
            Arc::clone(&self.job_control),
            bootstrap_job,
            coordinator_job,
            worker_jobs,
        ))
    }

    /// Jobs submitted by the current or most recent launch, in submission
    /// order. Updated as each submission succeeds, so it can be read while
    /// `launch` is still blocked in a wait.
    pub fn submitted_jobs(&self) -> Vec<JobId> {
        self.in_flight.lock().clone()
    }

    /// Kill the jobs of a partial launch, most recent first. Failures are logged.
    pub fn reap(&self, jobs: &[JobId]) {
        for job_id in jobs.iter().rev() {
            if let Err(e) = self.job_control.kill(job_id) {
                error!("Failed to kill job {} while reaping: {}", job_id, e);
            }
        }
    }
}
