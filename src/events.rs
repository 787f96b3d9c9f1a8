//! Publish/subscribe event channel used to observe and control a running workflow
//!
//! Events are scoped by [`WorkflowRunId`] so that several workflows can share
//! one broker without observing each other. Two brokers are provided: an
//! in-process [`MemoryBroker`] and a directory-backed [`SpoolBroker`] that
//! external logger processes can publish into.

mod channel;
mod event;
mod memory;
mod spool;

pub use channel::{EventChannel, EventFilter, Subscription};
pub use event::{Event, EventKind, LOGGER_PID_KEY, LOGGER_STATUS_KEY, WorkflowRunId};
pub use memory::MemoryBroker;
pub use spool::SpoolBroker;
