use log::{error, info};
use std::sync::Arc;

use super::state::{SharedState, Transition};
use crate::events::{Event, EventChannel, WorkflowRunId};

/// Delivers the end-of-life event to a workflow's loggers at most once.
///
/// The publish guard lives in the monitor's [`SharedState`], so the check-and-set
/// is serialized with every other liveness change. The publish itself runs after
/// the lock is released.
pub struct ShutdownCoordinator {
    run_id: WorkflowRunId,
    channel: Arc<dyn EventChannel>,
    control_topic: String,
    state: Arc<SharedState>,
}

impl ShutdownCoordinator {
    pub(crate) fn new(
        run_id: WorkflowRunId,
        channel: Arc<dyn EventChannel>,
        control_topic: String,
        state: Arc<SharedState>,
    ) -> Self {
        ShutdownCoordinator {
            run_id,
            channel,
            control_topic,
            state,
        }
    }

    /// Tell the loggers to wind down. Returns true only for the call that
    /// actually published.
    pub fn notify_loggers_done(&self) -> bool {
        if !self.state.claim_termination() {
            return false;
        }
        self.publish();
        true
    }

    pub fn has_notified(&self) -> bool {
        self.state.snapshot().sent_termination
    }

    /// Carry out the side effects of a terminal transition decided under the lock.
    pub(crate) fn complete(&self, transition: Transition) {
        if transition.must_publish {
            self.publish();
        } else if transition.terminated {
            self.state.wake_waiters();
        }
    }

    fn publish(&self) {
        info!(
            "Sending end-of-life event to loggers run_id={} topic={}",
            self.run_id, self.control_topic
        );
        let event = Event::end_of_life(self.run_id.clone());
        // The guard is already set, so a failed publish is not retried.
        if let Err(e) = self.channel.publish(&self.control_topic, &event) {
            error!(
                "Failed to publish end-of-life event run_id={}: {}",
                self.run_id, e
            );
        }
        self.state.finish_publish();
    }
}
