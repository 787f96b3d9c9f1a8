//! Directory-backed event bus
//!
//! Each topic is a directory under the spool root and each event one JSON file
//! in it. File names start with a zero-padded publish timestamp, so directory
//! order is roughly publish order. Publishers in other processes can finish
//! their rename late, so a file may appear behind names already read. Each
//! subscriber therefore keeps the set of names it has consumed rather than a
//! position, seeded with the files present when it subscribed.
//!
//! Nothing is deleted on publish. A subscriber removes files it has consumed
//! once their publish timestamp is older than the broker's retention.

use chrono::Utc;
use log::{debug, warn};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::channel::{EventChannel, EventFilter, Subscription};
use super::event::Event;
use crate::errors::{FlotillaError, Result};

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_RETENTION: Duration = Duration::from_secs(600);
const TIMESTAMP_WIDTH: usize = 20;

pub struct SpoolBroker {
    root: PathBuf,
    sequence: AtomicU64,
    scan_interval: Duration,
    retention: Duration,
}

impl SpoolBroker {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            FlotillaError::event_channel("*", format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(SpoolBroker {
            root,
            sequence: AtomicU64::new(0),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            retention: DEFAULT_RETENTION,
        })
    }

    pub fn with_scan_interval(mut self, scan_interval: Duration) -> Self {
        self.scan_interval = scan_interval;
        self
    }

    /// How long a consumed event file is kept before its subscriber deletes it.
    /// A subscriber lagging further behind than this can miss events.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn topic_dir(&self, topic: &str) -> PathBuf {
        let safe: String = topic
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(safe)
    }
}

fn event_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".json"))
        .collect();
    names.sort();
    Ok(names)
}

/// Publish time encoded in an event file name, in nanoseconds since the epoch.
fn published_nanos(name: &str) -> Option<i64> {
    name.get(..TIMESTAMP_WIDTH)?.parse().ok()
}

impl EventChannel for SpoolBroker {
    fn subscribe(&self, topic: &str, filter: EventFilter) -> Result<Box<dyn Subscription>> {
        let dir = self.topic_dir(topic);
        fs::create_dir_all(&dir).map_err(|e| FlotillaError::event_channel(topic, e))?;
        let seen: HashSet<String> = event_files(&dir)
            .map_err(|e| FlotillaError::event_channel(topic, e))?
            .into_iter()
            .collect();
        debug!(
            "subscribed to topic={} filter=[{}] skipping {} earlier event(s)",
            topic,
            filter,
            seen.len()
        );
        Ok(Box::new(SpoolSubscription {
            topic: topic.to_string(),
            dir,
            filter,
            seen,
            scan_interval: self.scan_interval,
            retention: self.retention,
        }))
    }

    fn publish(&self, topic: &str, event: &Event) -> Result<()> {
        let dir = self.topic_dir(topic);
        fs::create_dir_all(&dir).map_err(|e| FlotillaError::event_channel(topic, e))?;

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let name = format!(
            "{:0width$}-{:010}-{:06}.json",
            nanos,
            process::id(),
            seq,
            width = TIMESTAMP_WIDTH
        );
        let body =
            serde_json::to_vec(event).map_err(|e| FlotillaError::event_channel(topic, e))?;

        // Write then rename so readers never see a partial file.
        let tmp = dir.join(format!(".{}.tmp", name));
        fs::write(&tmp, body).map_err(|e| FlotillaError::event_channel(topic, e))?;
        fs::rename(&tmp, dir.join(&name)).map_err(|e| FlotillaError::event_channel(topic, e))?;
        Ok(())
    }
}

struct SpoolSubscription {
    topic: String,
    dir: PathBuf,
    filter: EventFilter,
    /// Names already consumed or present at subscribe time. Only names still
    /// on disk are kept.
    seen: HashSet<String>,
    scan_interval: Duration,
    retention: Duration,
}

impl SpoolSubscription {
    /// Delete consumed files published longer ago than the retention.
    fn expire(&mut self) {
        let retention = i64::try_from(self.retention.as_nanos()).unwrap_or(i64::MAX);
        let cutoff = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .saturating_sub(retention);
        let expired: Vec<String> = self
            .seen
            .iter()
            .filter(|name| published_nanos(name).is_some_and(|nanos| nanos < cutoff))
            .cloned()
            .collect();
        for name in expired {
            match fs::remove_file(self.dir.join(&name)) {
                Ok(()) => debug!("expired event {} on topic={}", name, self.topic),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Cannot remove expired event file {}: {}", name, e),
            }
            self.seen.remove(&name);
        }
    }

    fn next_matching(&mut self) -> Result<Option<Event>> {
        self.expire();
        let names =
            event_files(&self.dir).map_err(|e| FlotillaError::event_channel(&self.topic, e))?;
        let on_disk: HashSet<&str> = names.iter().map(String::as_str).collect();
        self.seen.retain(|name| on_disk.contains(name.as_str()));

        for name in &names {
            if !self.seen.insert(name.clone()) {
                continue;
            }

            let path = self.dir.join(name);
            let parsed = fs::read(&path).map_err(|e| e.to_string()).and_then(|body| {
                serde_json::from_slice::<Event>(&body).map_err(|e| e.to_string())
            });
            let event = match parsed {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping unreadable event file {}: {}", path.display(), e);
                    continue;
                }
            };
            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

impl Subscription for SpoolSubscription {
    fn receive(&mut self, timeout: Duration) -> Result<Option<Event>> {
        let started = Instant::now();
        loop {
            if let Some(event) = self.next_matching()? {
                return Ok(Some(event));
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(None);
            }
            thread::sleep(self.scan_interval.min(timeout - elapsed));
        }
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WorkflowRunId;
    use tempfile::TempDir;

    #[test]
    fn test_events_cross_broker_instances() {
        let dir = TempDir::new().unwrap();
        let publisher = SpoolBroker::new(dir.path()).unwrap();
        let subscriber = SpoolBroker::new(dir.path()).unwrap();
        let run = WorkflowRunId::new("run-1");

        let mut sub = subscriber
            .subscribe("logger.status", EventFilter::for_run(&run))
            .unwrap();
        publisher
            .publish(
                "logger.status",
                &Event::logger_completed(WorkflowRunId::new("other"), 5),
            )
            .unwrap();
        publisher
            .publish("logger.status", &Event::logger_completed(run.clone(), 7))
            .unwrap();

        let event = sub.receive(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(event.logger_pid(), Some(7));
        assert!(sub.receive(Duration::from_millis(20)).unwrap().is_none());
    }

    #[test]
    fn test_subscription_ignores_earlier_events() {
        let dir = TempDir::new().unwrap();
        let broker = SpoolBroker::new(dir.path()).unwrap();
        let run = WorkflowRunId::new("r");
        broker.publish("t", &Event::command(run.clone())).unwrap();

        let mut sub = broker.subscribe("t", EventFilter::all()).unwrap();
        assert!(sub.receive(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let broker = SpoolBroker::new(dir.path()).unwrap();
        let mut sub = broker.subscribe("t", EventFilter::all()).unwrap();

        fs::write(dir.path().join("t").join("99999999999999999998-junk.json"), "{").unwrap();
        assert!(sub.receive(Duration::ZERO).unwrap().is_none());
    }

    fn place_event(broker: &SpoolBroker, topic: &str, name: &str, event: &Event) {
        let body = serde_json::to_vec(event).unwrap();
        fs::write(broker.topic_dir(topic).join(name), body).unwrap();
    }

    fn files_in(broker: &SpoolBroker, topic: &str) -> Vec<String> {
        event_files(&broker.topic_dir(topic)).unwrap()
    }

    #[test]
    fn test_late_rename_with_older_name_is_delivered() {
        let dir = TempDir::new().unwrap();
        let broker = SpoolBroker::new(dir.path()).unwrap();
        let run = WorkflowRunId::new("run-1");
        let mut sub = broker
            .subscribe("logger.status", EventFilter::for_run(&run))
            .unwrap();

        broker
            .publish("logger.status", &Event::logger_completed(run.clone(), 102))
            .unwrap();
        let event = sub.receive(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(event.logger_pid(), Some(102));

        // Another process stamped its file first but renamed it into place last.
        place_event(
            &broker,
            "logger.status",
            "00000000000000000001-0000004242-000000.json",
            &Event::logger_completed(run.clone(), 101),
        );
        let event = sub.receive(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(event.logger_pid(), Some(101));
        assert!(sub.receive(Duration::from_millis(20)).unwrap().is_none());
    }

    #[test]
    fn test_consumed_events_expire_after_retention() {
        let dir = TempDir::new().unwrap();
        let broker = SpoolBroker::new(dir.path())
            .unwrap()
            .with_retention(Duration::from_millis(1));
        let run = WorkflowRunId::new("r");
        let mut sub = broker.subscribe("t", EventFilter::all()).unwrap();

        broker.publish("t", &Event::command(run.clone())).unwrap();
        // An ancient name nobody has read yet must survive until it is delivered.
        place_event(
            &broker,
            "t",
            "00000000000000000001-0000004242-000000.json",
            &Event::command(run.clone()),
        );
        assert!(sub.receive(Duration::from_millis(200)).unwrap().is_some());
        assert_eq!(files_in(&broker, "t").len(), 2);
        // Delivered on the first receive, so the second one sweeps it.
        assert!(sub.receive(Duration::from_millis(200)).unwrap().is_some());
        assert_eq!(files_in(&broker, "t").len(), 1);

        thread::sleep(Duration::from_millis(5));
        assert!(sub.receive(Duration::ZERO).unwrap().is_none());
        assert!(files_in(&broker, "t").is_empty());
    }

    #[test]
    fn test_default_retention_keeps_recent_events() {
        let dir = TempDir::new().unwrap();
        let broker = SpoolBroker::new(dir.path()).unwrap();
        let run = WorkflowRunId::new("r");
        let mut sub = broker.subscribe("t", EventFilter::all()).unwrap();

        broker.publish("t", &Event::command(run)).unwrap();
        assert!(sub.receive(Duration::from_millis(200)).unwrap().is_some());
        assert!(sub.receive(Duration::ZERO).unwrap().is_none());
        assert_eq!(files_in(&broker, "t").len(), 1);
    }
}
