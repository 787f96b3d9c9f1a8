use std::fmt;
use std::time::Duration;

use super::event::{Event, WorkflowRunId};
use crate::errors::Result;

/// Selects the events a subscription receives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    run_id: Option<WorkflowRunId>,
}

impl EventFilter {
    /// Accept every event on the topic.
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only events addressed to `run_id`.
    pub fn for_run(run_id: &WorkflowRunId) -> Self {
        EventFilter {
            run_id: Some(run_id.clone()),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match &self.run_id {
            Some(run_id) => &event.run_id == run_id,
            None => true,
        }
    }
}

/// Selector expression understood by broker-side filters
impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.run_id {
            Some(run_id) => write!(f, "RUNID = '{}'", run_id),
            None => f.write_str("TRUE"),
        }
    }
}

/// A publish/subscribe bus.
pub trait EventChannel: Send + Sync {
    /// Start receiving events published to `topic` from now on.
    fn subscribe(&self, topic: &str, filter: EventFilter) -> Result<Box<dyn Subscription>>;

    fn publish(&self, topic: &str, event: &Event) -> Result<()>;
}

pub trait Subscription: Send {
    /// Return the next matching event, or `None` once `timeout` has passed.
    /// Never blocks past `timeout`.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Event>>;

    fn topic(&self) -> &str;
}
