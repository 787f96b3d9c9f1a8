//! Background loop that follows a workflow's event topics

use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::{MonitorCore, TerminationReason};
use crate::clock::{Clock, PollTicker};
use crate::events::{Event, EventKind, Subscription};
use crate::scheduler::{JobControl, JobId};

/// Logger processes that have not yet reported completion. Owned by the watcher.
pub(crate) type LoggerRegistry = BTreeSet<u32>;

pub(crate) struct Watcher {
    pub core: Arc<MonitorCore>,
    pub primary_job: JobId,
    pub job_control: Arc<dyn JobControl>,
    pub status_events: Box<dyn Subscription>,
    pub logger_events: Box<dyn Subscription>,
    pub registry: LoggerRegistry,
    pub ticker: PollTicker,
    pub receive_timeout: Duration,
    pub clock: Arc<dyn Clock>,
}

impl Watcher {
    /// Run until the monitor leaves the Watching state.
    ///
    /// Each iteration receives at most one status-topic event and then at most
    /// one logger-topic event, always in that order.
    pub fn run(mut self) {
        let run_id = self.core.run_id.clone();
        info!(
            "Workflow watcher started run_id={} primary_job={} loggers={:?}",
            run_id, self.primary_job, self.registry
        );

        loop {
            self.ticker.tick(self.clock.as_ref());
            if !self.core.state.snapshot().running {
                break;
            }

            let mut had_activity = false;
            for from_logger_topic in [false, true] {
                let subscription = if from_logger_topic {
                    &mut self.logger_events
                } else {
                    &mut self.status_events
                };
                match subscription.receive(self.receive_timeout) {
                    Ok(Some(event)) => {
                        had_activity = true;
                        self.handle_event(event);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Event receive failed run_id={}: {}", run_id, e),
                }
                if !self.core.state.snapshot().running {
                    break;
                }
            }
            if !self.core.state.snapshot().running {
                break;
            }
            self.ticker.record(had_activity);
            self.check_primary_job();
        }

        info!("Workflow watcher finished run_id={}", run_id);
    }

    fn handle_event(&mut self, event: Event) {
        debug!(
            "Handling {:?} event run_id={} payload={:?}",
            event.kind, event.run_id, event.payload
        );
        match event.kind {
            EventKind::Status => {
                if let Some(pid) = event.logger_pid() {
                    if self.registry.remove(&pid) {
                        info!(
                            "Logger pid={} finished, {} outstanding",
                            pid,
                            self.registry.len()
                        );
                    } else {
                        debug!("Ignoring repeated or unknown logger pid={}", pid);
                    }
                }
                self.core
                    .settle_loggers(self.registry.len(), TerminationReason::LoggersDrained);
            }
            EventKind::Command => {
                info!(
                    "Received command event run_id={}, {} logger(s) still outstanding",
                    event.run_id,
                    self.registry.len()
                );
                self.core.terminate(TerminationReason::CommandReceived);
            }
            EventKind::Other(kind) => {
                warn!("Unhandled event kind '{}' run_id={}", kind, event.run_id);
            }
        }
    }

    /// A vanished coordinator job means the loggers should wind down; the
    /// watcher itself keeps draining their completion reports.
    fn check_primary_job(&self) {
        if self.core.shutdown.has_notified() {
            return;
        }
        match self.job_control.is_alive(&self.primary_job) {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    "Primary job {} is no longer alive run_id={}",
                    self.primary_job, self.core.run_id
                );
                self.core.shutdown.notify_loggers_done();
            }
            // Unknown, not dead.
            Err(e) => warn!("Liveness query failed for job {}: {}", self.primary_job, e),
        }
    }
}
