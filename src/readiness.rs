//! Readiness gating on output artifacts
//!
//! A job being "running" in the scheduler's sense does not mean it is ready to
//! serve downstream jobs. Readiness is signalled by the job writing its first
//! expected artifact (typically a log file).

use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, Deadline, system_clock};
use crate::errors::{FlotillaError, Result};

pub trait ReadinessWaiter: Send + Sync {
    /// Block until the coordinator's first artifact exists.
    fn wait_for_first(&self) -> Result<()>;

    /// Block until every expected artifact exists.
    fn wait_for_all(&self) -> Result<()>;
}

/// Waits for files to appear on disk.
///
/// The first path in the list is the coordinator's artifact. Waits are
/// unbounded unless a timeout is set; a missing artifact then hangs the launch.
pub struct FileWaiter {
    files: Vec<PathBuf>,
    poll_interval: Duration,
    timeout: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl FileWaiter {
    pub fn new(files: Vec<PathBuf>, poll_interval: Duration) -> Self {
        FileWaiter {
            files,
            poll_interval,
            timeout: None,
            clock: system_clock(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn wait_for(&self, files: &[PathBuf]) -> Result<()> {
        let clock = self.clock.as_ref();
        let deadline = Deadline::new(clock, self.timeout);
        let mut remaining: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();

        loop {
            remaining.retain(|path| !path.exists());
            if remaining.is_empty() {
                return Ok(());
            }
            if deadline.expired(clock) {
                let missing: Vec<String> =
                    remaining.iter().map(|p| p.display().to_string()).collect();
                return Err(FlotillaError::ReadinessTimeout {
                    what: format!("artifact(s) {}", missing.join(", ")),
                    waited: deadline.elapsed(clock),
                });
            }
            debug!(
                "waiting for {} artifact(s), next: {}",
                remaining.len(),
                remaining[0].display()
            );
            clock.sleep(self.poll_interval);
        }
    }
}

impl ReadinessWaiter for FileWaiter {
    fn wait_for_first(&self) -> Result<()> {
        let Some(first) = self.files.first() else {
            return Ok(());
        };
        info!("Waiting for first artifact {}", first.display());
        self.wait_for(std::slice::from_ref(first))
    }

    fn wait_for_all(&self) -> Result<()> {
        info!("Waiting for {} artifact(s)", self.files.len());
        self.wait_for(&self.files)
    }
}
