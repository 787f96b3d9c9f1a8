//! Flotilla - phased workflow launching and monitoring on cluster schedulers
//!
//! A workflow is launched in three gated phases (bootstrap, coordinator,
//! fan-out workers) through a [`scheduler::JobControl`] backend. Once every
//! phase is ready, a [`monitor::WorkflowMonitor`] watches the workflow's event
//! topics on a background thread and tells the log collectors to wind down
//! exactly once.

pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod launcher;
pub mod monitor;
pub mod readiness;
pub mod scheduler;

pub use config::FlotillaConfig;
pub use errors::{FlotillaError, LaunchError};
pub use events::{Event, EventChannel, EventFilter, EventKind, Subscription, WorkflowRunId};
pub use launcher::{JobDescriptor, LaunchPlan, WorkflowHandle, WorkflowLauncher};
pub use monitor::{MonitorPhase, StopUrgency, WorkflowMonitor};
pub use readiness::{FileWaiter, ReadinessWaiter};
pub use scheduler::{
    CondorInterface, JobControl, JobId, JobState, SchedulerType, SlurmInterface,
    create_job_control,
};
