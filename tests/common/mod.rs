#![allow(dead_code)]

use flotilla::config::FlotillaConfig;
use flotilla::errors::{FlotillaError, Result};
use flotilla::events::{Event, EventChannel, EventFilter, MemoryBroker, Subscription, WorkflowRunId};
use flotilla::launcher::JobDescriptor;
use flotilla::monitor::{
    StatusListener, TerminationReason, ThreadSpawner, WatcherBody, WatcherSpawner,
};
use flotilla::readiness::ReadinessWaiter;
use flotilla::scheduler::{JobControl, JobId, JobState};
use parking_lot::Mutex;
use rstest::fixture;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const STATUS_TOPIC: &str = "flotilla.monitor";
pub const LOGGER_TOPIC: &str = "logger.status";
pub const CONTROL_TOPIC: &str = "logging";

/// Ordered record of calls made against the fakes, shared between them so
/// cross-component ordering can be asserted.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Entries other than scheduler status queries.
    pub fn actions(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| !e.starts_with("status:"))
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// Scheduler stand-in. Jobs are numbered from 1001 in submission order and are
/// Running unless told otherwise.
pub struct FakeJobControl {
    log: CallLog,
    next_id: AtomicU32,
    default_state: Mutex<JobState>,
    states: Mutex<HashMap<JobId, JobState>>,
    failing_submits: Mutex<HashSet<String>>,
    fail_status: AtomicBool,
    fail_kill: AtomicBool,
}

impl FakeJobControl {
    pub fn new(log: CallLog) -> Self {
        FakeJobControl {
            log,
            next_id: AtomicU32::new(1001),
            default_state: Mutex::new(JobState::Running),
            states: Mutex::new(HashMap::new()),
            failing_submits: Mutex::new(HashSet::new()),
            fail_status: AtomicBool::new(false),
            fail_kill: AtomicBool::new(false),
        }
    }

    pub fn set_state(&self, job_id: &str, state: JobState) {
        self.states.lock().insert(JobId::from(job_id), state);
    }

    pub fn set_default_state(&self, state: JobState) {
        *self.default_state.lock() = state;
    }

    pub fn fail_submit_of(&self, name: &str) {
        self.failing_submits.lock().insert(name.to_string());
    }

    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn fail_kill(&self, fail: bool) {
        self.fail_kill.store(fail, Ordering::SeqCst);
    }

    pub fn kills(&self) -> Vec<String> {
        self.log
            .entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix("kill:").map(str::to_string))
            .collect()
    }
}

impl JobControl for FakeJobControl {
    fn submit(&self, descriptor: &JobDescriptor) -> Result<JobId> {
        self.log.push(format!("submit:{}", descriptor.name));
        if self.failing_submits.lock().contains(&descriptor.name) {
            return Err(FlotillaError::Submission {
                descriptor: descriptor.name.clone(),
                reason: "queue rejected the job".to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(JobId::from(id.to_string()))
    }

    fn status(&self, job_id: &JobId) -> Result<JobState> {
        self.log.push(format!("status:{}", job_id));
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(FlotillaError::SchedulerQuery {
                job_id: job_id.to_string(),
                reason: "scheduler unreachable".to_string(),
            });
        }
        let state = self.states.lock().get(job_id).copied();
        Ok(state.unwrap_or(*self.default_state.lock()))
    }

    fn kill(&self, job_id: &JobId) -> Result<()> {
        self.log.push(format!("kill:{}", job_id));
        if self.fail_kill.load(Ordering::SeqCst) {
            return Err(FlotillaError::SchedulerQuery {
                job_id: job_id.to_string(),
                reason: "permission denied".to_string(),
            });
        }
        Ok(())
    }
}

/// Readiness stand-in that records when each wait returns.
#[derive(Default)]
pub struct FakeReadiness {
    log: CallLog,
    fail_first: AtomicBool,
    fail_all: AtomicBool,
}

impl FakeReadiness {
    pub fn new(log: CallLog) -> Self {
        FakeReadiness {
            log,
            ..Default::default()
        }
    }

    pub fn fail_first(&self) {
        self.fail_first.store(true, Ordering::SeqCst);
    }

    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    fn outcome(&self, what: &str, fail: &AtomicBool) -> Result<()> {
        if fail.load(Ordering::SeqCst) {
            return Err(FlotillaError::ReadinessTimeout {
                what: what.to_string(),
                waited: Duration::from_millis(10),
            });
        }
        self.log.push(format!("ready:{}", what));
        Ok(())
    }
}

impl ReadinessWaiter for FakeReadiness {
    fn wait_for_first(&self) -> Result<()> {
        self.outcome("first", &self.fail_first)
    }

    fn wait_for_all(&self) -> Result<()> {
        self.outcome("all", &self.fail_all)
    }
}

/// Spawns real threads and counts how many were requested.
#[derive(Default)]
pub struct CountingSpawner {
    spawned: AtomicUsize,
    fail: AtomicBool,
}

impl CountingSpawner {
    pub fn failing() -> Self {
        CountingSpawner {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn allow(&self) {
        self.fail.store(false, Ordering::SeqCst);
    }
}

impl WatcherSpawner for CountingSpawner {
    fn spawn(&self, name: String, body: WatcherBody) -> io::Result<JoinHandle<()>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::other("thread limit reached"));
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        ThreadSpawner.spawn(name, body)
    }
}

/// In-memory channel that can be told to fail receives or publishes.
#[derive(Default)]
pub struct FlakyChannel {
    inner: MemoryBroker,
    receive_failures: Arc<AtomicUsize>,
    fail_publish_to: Mutex<Option<String>>,
}

impl FlakyChannel {
    /// Fail the next `count` receive calls across all subscriptions.
    pub fn fail_receives(&self, count: usize) {
        self.receive_failures.store(count, Ordering::SeqCst);
    }

    pub fn receive_failures_left(&self) -> usize {
        self.receive_failures.load(Ordering::SeqCst)
    }

    pub fn fail_publish_to(&self, topic: &str) {
        *self.fail_publish_to.lock() = Some(topic.to_string());
    }
}

impl EventChannel for FlakyChannel {
    fn subscribe(&self, topic: &str, filter: EventFilter) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(FlakySubscription {
            inner: self.inner.subscribe(topic, filter)?,
            failures: Arc::clone(&self.receive_failures),
        }))
    }

    fn publish(&self, topic: &str, event: &Event) -> Result<()> {
        if self.fail_publish_to.lock().as_deref() == Some(topic) {
            return Err(FlotillaError::event_channel(topic, "broker connection reset"));
        }
        self.inner.publish(topic, event)
    }
}

struct FlakySubscription {
    inner: Box<dyn Subscription>,
    failures: Arc<AtomicUsize>,
}

impl Subscription for FlakySubscription {
    fn receive(&mut self, timeout: Duration) -> Result<Option<Event>> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(FlotillaError::event_channel(self.inner.topic(), "transient"));
        }
        self.inner.receive(timeout)
    }

    fn topic(&self) -> &str {
        self.inner.topic()
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub started: Mutex<Vec<WorkflowRunId>>,
    pub ended: Mutex<Vec<(WorkflowRunId, TerminationReason)>>,
}

impl StatusListener for RecordingListener {
    fn workflow_started(&self, run_id: &WorkflowRunId) {
        self.started.lock().push(run_id.clone());
    }

    fn workflow_ended(&self, run_id: &WorkflowRunId, reason: TerminationReason) {
        self.ended.lock().push((run_id.clone(), reason));
    }
}

/// Configuration with intervals short enough for tests.
#[fixture]
pub fn fast_config() -> FlotillaConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = FlotillaConfig::default();
    config.launcher.running_poll_interval_secs = 0.005;
    config.launcher.readiness_poll_interval_secs = 0.005;
    config.monitor.status_check_interval_secs = 0.01;
    config.monitor.receive_timeout_secs = 0.01;
    config
}

#[fixture]
pub fn call_log() -> CallLog {
    CallLog::default()
}

#[fixture]
pub fn broker() -> Arc<MemoryBroker> {
    Arc::new(MemoryBroker::new())
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Count end-of-life events delivered to `subscription`, waiting up to
/// `settle` for stragglers.
pub fn count_end_of_life(subscription: &mut Box<dyn Subscription>, settle: Duration) -> usize {
    let mut count = 0;
    while let Ok(Some(event)) = subscription.receive(settle) {
        if event.is_end_of_life() {
            count += 1;
        }
    }
    count
}
