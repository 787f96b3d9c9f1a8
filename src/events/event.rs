use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Payload key present on status events emitted by a logger process
pub const LOGGER_STATUS_KEY: &str = "logger.status";
/// Payload key carrying the reporting logger's process id
pub const LOGGER_PID_KEY: &str = "logger.pid";

/// Identifier scoping all events and job submissions of one workflow instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowRunId(String);

impl WorkflowRunId {
    pub fn new(id: impl Into<String>) -> Self {
        WorkflowRunId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    /// Operator-issued directive. Any command stops the monitor.
    Command,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub run_id: WorkflowRunId,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, run_id: WorkflowRunId, payload: Map<String, Value>) -> Self {
        Event {
            kind,
            run_id,
            published_at: Utc::now(),
            payload,
        }
    }

    pub fn status(run_id: WorkflowRunId, payload: Map<String, Value>) -> Self {
        Self::new(EventKind::Status, run_id, payload)
    }

    pub fn command(run_id: WorkflowRunId) -> Self {
        Self::new(EventKind::Command, run_id, Map::new())
    }

    /// Status event a logger process sends once it has drained its output.
    pub fn logger_completed(run_id: WorkflowRunId, pid: u32) -> Self {
        let mut payload = Map::new();
        payload.insert(LOGGER_STATUS_KEY.to_string(), Value::from("done"));
        payload.insert(LOGGER_PID_KEY.to_string(), Value::from(pid));
        Self::status(run_id, payload)
    }

    /// Control event telling every logger of the run to wind down.
    pub fn end_of_life(run_id: WorkflowRunId) -> Self {
        let mut payload = Map::new();
        payload.insert("component".to_string(), Value::from("control"));
        payload.insert("status".to_string(), Value::from("end-of-life"));
        Self::status(run_id, payload)
    }

    pub fn is_end_of_life(&self) -> bool {
        self.payload.get("component").and_then(Value::as_str) == Some("control")
            && self.payload.get("status").and_then(Value::as_str) == Some("end-of-life")
    }

    /// Whether this is a logger lifecycle record.
    pub fn is_logger_report(&self) -> bool {
        self.kind == EventKind::Status && self.payload.contains_key(LOGGER_STATUS_KEY)
    }

    /// Pid of the reporting logger, if this is a logger record with a usable pid.
    pub fn logger_pid(&self) -> Option<u32> {
        if !self.is_logger_report() {
            return None;
        }
        self.payload
            .get(LOGGER_PID_KEY)
            .and_then(Value::as_u64)
            .and_then(|pid| u32::try_from(pid).ok())
    }
}
