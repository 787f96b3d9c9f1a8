//! Workflow monitoring
//!
//! A [`WorkflowMonitor`] follows one launched workflow. Its single background
//! watcher consumes the workflow's status and logger topics and decides when
//! the workflow is over:
//!
//! - every registered logger process has reported completion, or
//! - an operator command event arrives (this wins over outstanding loggers).
//!
//! Either way the monitor leaves the Watching state exactly once and the
//! [`ShutdownCoordinator`] publishes the end-of-life event to the loggers. The
//! coordinator job disappearing from the scheduler, or a caller invoking
//! [`WorkflowMonitor::stop`], also triggers that publish, but never a second one.
//!
//! # States
//!
//! ```text
//! Idle --start()--> Watching --terminal event--> Terminating --thread exit--> Terminated
//! ```
//!
//! A monitor is single-use: once it has left Watching it never runs again.

mod shutdown;
mod spawner;
mod state;
mod watcher;

pub use shutdown::ShutdownCoordinator;
pub use spawner::{ThreadSpawner, WatcherBody, WatcherSpawner};
pub use state::LivenessState;

use log::{error, info, warn};
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::{Clock, PollTicker, system_clock};
use crate::config::MonitorConfig;
use crate::errors::{FlotillaError, Result};
use crate::events::{EventChannel, EventFilter, WorkflowRunId};
use crate::scheduler::{JobControl, JobId};
use state::SharedState;
use watcher::{LoggerRegistry, Watcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Watching,
    /// Terminal condition reached; the watcher may still be exiting.
    Terminating,
    /// Terminal condition reached and the watcher thread has exited.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopUrgency {
    /// Kill the coordinator job and notify the loggers, then keep draining
    /// their completion reports.
    Graceful,
    /// As `Graceful`, and also end the watcher at its next iteration.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    LoggersDrained,
    CommandReceived,
    StopRequested,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::LoggersDrained => f.write_str("all loggers finished"),
            TerminationReason::CommandReceived => f.write_str("command event received"),
            TerminationReason::StopRequested => f.write_str("stop requested"),
        }
    }
}

/// Observer of a monitor's lifecycle. Called on whichever thread caused the change.
///
/// `workflow_started` always returns before `workflow_ended` is called for the
/// same run. A monitor stopped before it started reports only the end.
pub trait StatusListener: Send + Sync {
    fn workflow_started(&self, _run_id: &WorkflowRunId) {}

    fn workflow_ended(&self, run_id: &WorkflowRunId, reason: TerminationReason);
}

/// State shared by the monitor handle and its watcher thread
pub(crate) struct MonitorCore {
    pub run_id: WorkflowRunId,
    pub state: Arc<SharedState>,
    pub shutdown: ShutdownCoordinator,
    listeners: Mutex<Vec<Arc<dyn StatusListener>>>,
    /// Held while listeners are told about a start or an end. Reentrant so a
    /// listener may stop the monitor from inside `workflow_started`.
    lifecycle: ReentrantMutex<()>,
}

impl MonitorCore {
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        let transition = self.state.terminate();
        self.finish_transition(transition, reason)
    }

    pub fn settle_loggers(&self, outstanding: usize, reason: TerminationReason) -> bool {
        let transition = self.state.settle_loggers(outstanding);
        self.finish_transition(transition, reason)
    }

    fn finish_transition(
        &self,
        transition: state::Transition,
        reason: TerminationReason,
    ) -> bool {
        if !transition.terminated {
            return false;
        }
        info!("Workflow run_id={} is terminating: {}", self.run_id, reason);
        self.shutdown.complete(transition);
        let _lifecycle = self.lifecycle.lock();
        for listener in self.listeners() {
            listener.workflow_ended(&self.run_id, reason);
        }
        true
    }

    fn listeners(&self) -> Vec<Arc<dyn StatusListener>> {
        self.listeners.lock().clone()
    }
}

/// Monitors one launched workflow. See the module documentation.
pub struct WorkflowMonitor {
    core: Arc<MonitorCore>,
    primary_job: JobId,
    channel: Arc<dyn EventChannel>,
    job_control: Arc<dyn JobControl>,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn WatcherSpawner>,
    /// Handed to the watcher on start. Also serializes concurrent `start()` calls.
    pending_registry: Mutex<Option<LoggerRegistry>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkflowMonitor {
    /// Create an idle monitor. `primary_job` is the coordinator job whose
    /// disappearance tells the loggers to wind down.
    pub fn new(
        run_id: WorkflowRunId,
        primary_job: JobId,
        channel: Arc<dyn EventChannel>,
        job_control: Arc<dyn JobControl>,
        loggers: impl IntoIterator<Item = u32>,
        config: MonitorConfig,
    ) -> Self {
        let registry: LoggerRegistry = loggers.into_iter().collect();
        let state = Arc::new(SharedState::new(registry.len()));
        let shutdown = ShutdownCoordinator::new(
            run_id.clone(),
            Arc::clone(&channel),
            config.control_topic.clone(),
            Arc::clone(&state),
        );
        WorkflowMonitor {
            core: Arc::new(MonitorCore {
                run_id,
                state,
                shutdown,
                listeners: Mutex::new(Vec::new()),
                lifecycle: ReentrantMutex::new(()),
            }),
            primary_job,
            channel,
            job_control,
            config,
            clock: system_clock(),
            spawner: Arc::new(ThreadSpawner),
            pending_registry: Mutex::new(Some(registry)),
            watcher: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WatcherSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn run_id(&self) -> &WorkflowRunId {
        &self.core.run_id
    }

    pub fn primary_job(&self) -> &JobId {
        &self.primary_job
    }

    pub fn add_status_listener(&self, listener: Arc<dyn StatusListener>) {
        self.core.listeners.lock().push(listener);
    }

    /// Subscribe to the workflow's topics and spawn the watcher.
    ///
    /// Only the first successful call does anything. Subscription failures are
    /// returned and leave the monitor idle, so `start()` may be retried.
    pub fn start(&self) -> Result<()> {
        let mut pending = self.pending_registry.lock();
        let Some(registry) = pending.as_ref() else {
            return Ok(());
        };
        if self.core.state.snapshot().done {
            return Ok(());
        }

        let filter = EventFilter::for_run(&self.core.run_id);
        let status_events = self
            .channel
            .subscribe(&self.config.status_topic, filter.clone())?;
        let logger_events = self.channel.subscribe(&self.config.logger_topic, filter)?;

        // An end reported by the watcher or a concurrent stop waits here until
        // the start has been reported.
        let lifecycle = self.core.lifecycle.lock();
        if !self.core.state.begin_watching() {
            return Ok(());
        }

        let watcher = Watcher {
            core: Arc::clone(&self.core),
            primary_job: self.primary_job.clone(),
            job_control: Arc::clone(&self.job_control),
            status_events,
            logger_events,
            registry: registry.clone(),
            ticker: PollTicker::new(self.config.status_check_interval()),
            receive_timeout: self.config.receive_timeout(),
            clock: Arc::clone(&self.clock),
        };
        let name = format!("flotilla-watch-{}", self.core.run_id);
        match self.spawner.spawn(name, Box::new(move || watcher.run())) {
            Ok(handle) => {
                *pending = None;
                *self.watcher.lock() = Some(handle);
            }
            Err(e) => {
                self.core.state.abort_watching();
                return Err(FlotillaError::WatcherSpawn(e));
            }
        }
        drop(pending);

        info!("Started monitor for workflow run_id={}", self.core.run_id);
        for listener in self.core.listeners() {
            listener.workflow_started(&self.core.run_id);
        }
        drop(lifecycle);
        Ok(())
    }

    /// Stop the workflow on the caller's behalf.
    ///
    /// Always completes: a failed kill is logged and the loggers are notified anyway.
    pub fn stop(&self, urgency: StopUrgency) {
        info!(
            "Stopping workflow run_id={} urgency={:?}",
            self.core.run_id, urgency
        );
        if let Err(e) = self.job_control.kill(&self.primary_job) {
            error!("Failed to kill primary job {}: {}", self.primary_job, e);
        }
        self.core.shutdown.notify_loggers_done();
        if urgency == StopUrgency::Immediate {
            self.core.terminate(TerminationReason::StopRequested);
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.state.snapshot().running
    }

    pub fn phase(&self) -> MonitorPhase {
        let state = self.core.state.snapshot();
        if state.running {
            return MonitorPhase::Watching;
        }
        if !state.done {
            return MonitorPhase::Idle;
        }
        let exited = self
            .watcher
            .lock()
            .as_ref()
            .is_none_or(|handle| handle.is_finished());
        if exited {
            MonitorPhase::Terminated
        } else {
            MonitorPhase::Terminating
        }
    }

    pub fn liveness(&self) -> LivenessState {
        self.core.state.snapshot()
    }

    /// Loggers that have not yet reported completion.
    pub fn loggers_outstanding(&self) -> usize {
        self.core.state.snapshot().loggers_outstanding
    }

    pub fn termination_sent(&self) -> bool {
        self.core.shutdown.has_notified()
    }

    /// Publish the end-of-life event now, if it has not been published yet.
    pub fn notify_loggers_done(&self) -> bool {
        self.core.shutdown.notify_loggers_done()
    }

    /// Block until the workflow reached its terminal state and the loggers have
    /// been notified. Returns false on timeout.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        self.core.state.wait_until_done(timeout)
    }

    /// Wait for the watcher thread to exit.
    pub fn join(&self) {
        let handle = self.watcher.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("Watcher thread for run_id={} panicked", self.core.run_id);
        }
    }
}

impl fmt::Debug for WorkflowMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowMonitor")
            .field("run_id", &self.core.run_id)
            .field("primary_job", &self.primary_job)
            .field("state", &self.core.state.snapshot())
            .finish()
    }
}
