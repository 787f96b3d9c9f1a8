//! Advisory job-record files for external cleanup tooling

use log::debug;
use std::fs;
use std::path::Path;

use crate::errors::{FlotillaError, Result};
use crate::scheduler::JobId;

/// Write `"<job_id>.0\n"` to `path`.
pub fn write_job_record(job_id: &JobId, path: &Path) -> Result<()> {
    debug!("Writing job record {} for job {}", path.display(), job_id);
    fs::write(path, format!("{}.0\n", job_id)).map_err(|source| FlotillaError::JobRecord {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.job");
        write_job_record(&JobId::from("1234"), &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1234.0\n");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("worker.job");
        let err = write_job_record(&JobId::from("1"), &path).unwrap_err();
        assert!(matches!(err, FlotillaError::JobRecord { .. }));
    }
}
