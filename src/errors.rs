use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::JobId;

pub type Result<T> = std::result::Result<T, FlotillaError>;

#[derive(Debug, Error)]
pub enum FlotillaError {
    /// The scheduler rejected or failed to accept a job.
    #[error("submission of '{descriptor}' failed: {reason}")]
    Submission { descriptor: String, reason: String },

    /// A running-state or artifact wait exceeded its bound.
    #[error("timed out after {waited:?} waiting for {what}")]
    ReadinessTimeout { what: String, waited: Duration },

    #[error("event channel error on topic '{topic}': {reason}")]
    EventChannel { topic: String, reason: String },

    /// A liveness query failed. Callers treat this as "unknown", never as "dead".
    #[error("scheduler query for job {job_id} failed: {reason}")]
    SchedulerQuery { job_id: String, reason: String },

    #[error("failed to write job record {path}: {source}")]
    JobRecord {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn watcher thread: {0}")]
    WatcherSpawn(#[source] std::io::Error),

    #[error("invalid launch plan: {0}")]
    InvalidPlan(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FlotillaError {
    pub fn event_channel(topic: &str, reason: impl ToString) -> Self {
        FlotillaError::EventChannel {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A failed launch, together with every job that was already submitted.
///
/// No rollback is attempted; pass `submitted` to
/// [`crate::launcher::WorkflowLauncher::reap`] to clean up a partial launch.
#[derive(Debug, Error)]
#[error("workflow launch failed after {} submitted job(s): {source}", submitted.len())]
pub struct LaunchError {
    #[source]
    pub source: FlotillaError,
    pub submitted: Vec<JobId>,
}

impl LaunchError {
    pub fn new(source: FlotillaError, submitted: Vec<JobId>) -> Self {
        LaunchError { source, submitted }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.source, FlotillaError::ReadinessTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error_reports_submitted_count() {
        let err = LaunchError::new(
            FlotillaError::Submission {
                descriptor: "worker-3".to_string(),
                reason: "no slots".to_string(),
            },
            vec![JobId::from("11"), JobId::from("12")],
        );
        let msg = err.to_string();
        assert!(msg.contains("2 submitted job(s)"));
        assert!(msg.contains("worker-3"));
        assert!(!err.is_timeout());
    }
}
