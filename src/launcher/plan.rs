use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{FlotillaError, Result};
use crate::events::WorkflowRunId;

/// A prepared, submittable unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,

    /// Submit file (HTCondor) or batch script (Slurm)
    pub script: PathBuf,

    /// Directory the submit command runs in. Defaults to the caller's cwd.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Where the job record is written. See [`JobDescriptor::record_path`].
    #[serde(default)]
    pub record_path: Option<PathBuf>,
}

impl JobDescriptor {
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        JobDescriptor {
            name: name.into(),
            script: script.into(),
            working_dir: None,
            record_path: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    /// The explicit record path, or `<script dir>/<script dir name>.job`.
    pub fn record_path(&self) -> PathBuf {
        if let Some(path) = &self.record_path {
            return path.clone();
        }
        let dir = self.script.parent().unwrap_or_else(|| Path::new(""));
        let stem = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone());
        dir.join(format!("{}.job", stem))
    }
}

/// The ordered phases of one workflow launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchPlan {
    pub run_id: WorkflowRunId,

    /// Infrastructure acquisition job (e.g. a glide-in request)
    #[serde(default)]
    pub bootstrap: Option<JobDescriptor>,

    /// The single job every worker depends on
    pub coordinator: JobDescriptor,

    #[serde(default)]
    pub workers: Vec<JobDescriptor>,

    /// Pids of the log collectors that must report completion
    #[serde(default)]
    pub loggers: Vec<u32>,

    /// Readiness artifacts, coordinator's first
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,

    #[serde(default)]
    pub skip_bootstrap: bool,
}

impl LaunchPlan {
    pub fn new(run_id: WorkflowRunId, coordinator: JobDescriptor) -> Self {
        LaunchPlan {
            run_id,
            bootstrap: None,
            coordinator,
            workers: Vec::new(),
            loggers: Vec::new(),
            artifacts: Vec::new(),
            skip_bootstrap: false,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FlotillaError::InvalidPlan(format!("cannot read {}: {}", path.display(), e))
        })?;
        let plan: LaunchPlan = toml::from_str(&content).map_err(|e| {
            FlotillaError::InvalidPlan(format!("cannot parse {}: {}", path.display(), e))
        })?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_id.as_str().trim().is_empty() {
            return Err(FlotillaError::InvalidPlan("run_id is empty".to_string()));
        }
        let jobs = self
            .bootstrap
            .iter()
            .chain(std::iter::once(&self.coordinator))
            .chain(self.workers.iter());
        for job in jobs {
            if job.script.as_os_str().is_empty() {
                return Err(FlotillaError::InvalidPlan(format!(
                    "job '{}' has no script",
                    job.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_path_defaults_to_script_directory() {
        let job = JobDescriptor::new("joboffice", "/scratch/run1/joboffice/joboffice.condor");
        assert_eq!(
            job.record_path(),
            PathBuf::from("/scratch/run1/joboffice/joboffice.job")
        );

        let job = job.with_record_path("/scratch/run1/glidein.job");
        assert_eq!(job.record_path(), PathBuf::from("/scratch/run1/glidein.job"));
    }

    #[test]
    fn test_plan_parses_from_toml() {
        let plan: LaunchPlan = toml::from_str(
            r#"
run_id = "run-42"
loggers = [101, 102]

[bootstrap]
name = "glidein"
script = "/scratch/glidein.condor"

[coordinator]
name = "joboffice"
script = "/scratch/joboffice/joboffice.condor"

[[workers]]
name = "worker-1"
script = "/scratch/worker-1/worker-1.condor"
"#,
        )
        .unwrap();
        assert_eq!(plan.run_id.as_str(), "run-42");
        assert_eq!(plan.loggers, vec![101, 102]);
        assert_eq!(plan.workers.len(), 1);
        assert!(!plan.skip_bootstrap);
        plan.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_script() {
        let plan = LaunchPlan::new(WorkflowRunId::new("r"), JobDescriptor::new("c", ""));
        assert!(matches!(plan.validate(), Err(FlotillaError::InvalidPlan(_))));
    }
}
