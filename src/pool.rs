//! Typed view of a provisioned worker pool and the state files that record it.
//!
//! The worker manager writes two single-line, comma-separated files after a
//! successful `up`: worker IPs and the task ARNs needed to terminate them.
//! [`StateFiles`] reads them back into a [`WorkerPool`] so the rest of the
//! crate passes the pool around as a value.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;

use crate::error::{Result, XdistError};

pub const WORKER_IPS_FILE: &str = "pytest_worker_ips.txt";
pub const TASK_ARNS_FILE: &str = "pytest_task_arns.txt";

/// Split a comma-separated id list, trimming items and dropping empty ones.
pub fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// One generation of workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerPool {
    pub ips: Vec<String>,
    pub task_arns: Vec<String>,
}

impl WorkerPool {
    pub fn new(ips: Vec<String>, task_arns: Vec<String>) -> Self {
        Self { ips, task_arns }
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    /// Value passed to the manager's `--task_arns` flag.
    pub fn termination_payload(&self) -> String {
        self.task_arns.join(",")
    }
}

/// Location of the state files shared with the worker manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFiles {
    dir: PathBuf,
}

impl Default for StateFiles {
    fn default() -> Self {
        Self::new(".")
    }
}

impl StateFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ips_path(&self) -> PathBuf {
        self.dir.join(WORKER_IPS_FILE)
    }

    pub fn task_arns_path(&self) -> PathBuf {
        self.dir.join(TASK_ARNS_FILE)
    }

    /// Read the pool written by a successful `up`.
    ///
    /// The IP file must exist. A missing ARN file yields an empty ARN list;
    /// the pool can still be bootstrapped but not terminated from this value.
    pub async fn read_pool(&self) -> Result<WorkerPool> {
        let ips_path = self.ips_path();
        let ips = match read_optional(&ips_path).await? {
            Some(raw) => parse_id_list(&raw),
            None => return Err(XdistError::MissingState(ips_path)),
        };

        let task_arns = match read_optional(&self.task_arns_path()).await? {
            Some(raw) => parse_id_list(&raw),
            None => {
                tracing::warn!(
                    path = %self.task_arns_path().display(),
                    "No task ARN file found, pool cannot be terminated from this record"
                );
                Vec::new()
            }
        };

        Ok(WorkerPool { ips, task_arns })
    }

    /// Termination payload, verbatim apart from surrounding whitespace.
    /// `Ok(None)` when the file does not exist.
    pub async fn read_task_arns_payload(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.task_arns_path())
            .await?
            .map(|raw| raw.trim().to_string()))
    }

    /// Write both files in the worker manager's format.
    pub async fn write_pool(&self, pool: &WorkerPool) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(self.ips_path(), pool.ips.join(",")).await?;
        fs::write(self.task_arns_path(), pool.termination_payload()).await?;
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_three_ips() {
        let ips = parse_id_list("10.0.0.1,10.0.0.2,10.0.0.3");
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn parse_ignores_blanks_and_newline() {
        let ips = parse_id_list(" 10.0.0.1 ,, 10.0.0.2,\n");
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);
        assert!(parse_id_list("").is_empty());
    }

    #[test]
    fn termination_payload_joins_arns() {
        let pool = WorkerPool::new(
            vec!["10.0.0.1".to_string()],
            vec!["arn:a".to_string(), "arn:b".to_string()],
        );
        assert_eq!(pool.termination_payload(), "arn:a,arn:b");
        assert_eq!(pool.len(), 1);
        assert!(!pool.is_empty());
    }

    #[test]
    fn state_file_paths() {
        let state = StateFiles::new("/work");
        assert_eq!(state.ips_path(), PathBuf::from("/work/pytest_worker_ips.txt"));
        assert_eq!(
            state.task_arns_path(),
            PathBuf::from("/work/pytest_task_arns.txt")
        );
    }
}
