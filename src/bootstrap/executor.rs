use std::future::Future;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use uuid::Uuid;

use super::plan::BootstrapJob;
use crate::config::SshConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::TimedOut => write!(f, "timed out"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of bootstrapping one worker
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapOutcome {
    pub job_id: Uuid,
    pub host: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BootstrapOutcome {
    /// Outcome for a job that never reported back.
    pub fn unfinished(job: &BootstrapJob, status: JobStatus, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job.id,
            host: job.host.clone(),
            status,
            exit_code: None,
            output: None,
            error: Some(error.into()),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Runs a script on a remote host.
pub trait RemoteShell: Send + Sync + 'static {
    fn run(&self, host: &str, script: &str)
        -> impl Future<Output = std::io::Result<Output>> + Send;
}

/// `ssh <options> <user>@<host> <script>`
#[derive(Debug, Clone)]
pub struct SshShell {
    config: SshConfig,
}

impl SshShell {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn args(&self, host: &str, script: &str) -> Vec<String> {
        let mut args = self.config.options.clone();
        args.push(self.config.destination(host));
        args.push(script.to_string());
        args
    }
}

impl RemoteShell for SshShell {
    async fn run(&self, host: &str, script: &str) -> std::io::Result<Output> {
        Command::new(&self.config.program)
            .args(self.args(host, script))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Aborted or timed-out jobs must not leave ssh sessions behind
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Executes bootstrap jobs through a [`RemoteShell`].
#[derive(Debug)]
pub struct BootstrapExecutor<S> {
    shell: Arc<S>,
    timeout: Option<Duration>,
}

impl<S> Clone for BootstrapExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            shell: Arc::clone(&self.shell),
            timeout: self.timeout,
        }
    }
}

impl<S: RemoteShell> BootstrapExecutor<S> {
    pub fn new(shell: S, timeout: Option<Duration>) -> Self {
        Self {
            shell: Arc::new(shell),
            timeout,
        }
    }

    /// Bootstrap one worker. Failures are reported in the outcome.
    pub async fn execute(&self, job: &BootstrapJob) -> BootstrapOutcome {
        tracing::info!(job_id = %job.id, host = %job.host, "Bootstrapping worker");
        let started_at = Utc::now();

        let run = self.shell.run(&job.host, &job.command);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(
                        job_id = %job.id,
                        host = %job.host,
                        timeout_secs = limit.as_secs(),
                        "Bootstrap timed out"
                    );
                    return BootstrapOutcome {
                        started_at,
                        ..BootstrapOutcome::unfinished(
                            job,
                            JobStatus::TimedOut,
                            format!("timed out after {}s", limit.as_secs()),
                        )
                    };
                }
            },
            None => run.await,
        };

        Self::process_output(job, started_at, result)
    }

    fn process_output(
        job: &BootstrapJob,
        started_at: DateTime<Utc>,
        result: std::io::Result<Output>,
    ) -> BootstrapOutcome {
        let finished_at = Utc::now();
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                let (status, error) = if output.status.success() {
                    (JobStatus::Succeeded, None)
                } else {
                    (
                        JobStatus::Failed,
                        Some(if stderr.trim().is_empty() {
                            format!("Exit code: {:?}", exit_code)
                        } else {
                            stderr
                        }),
                    )
                };

                if status == JobStatus::Succeeded {
                    tracing::info!(job_id = %job.id, host = %job.host, "Worker bootstrapped");
                } else {
                    tracing::error!(
                        job_id = %job.id,
                        host = %job.host,
                        exit_code = ?exit_code,
                        "Worker bootstrap failed"
                    );
                }

                BootstrapOutcome {
                    job_id: job.id,
                    host: job.host.clone(),
                    status,
                    exit_code,
                    output: if stdout.is_empty() { None } else { Some(stdout) },
                    error,
                    started_at,
                    finished_at,
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, host = %job.host, error = %e, "Could not start bootstrap");
                BootstrapOutcome {
                    job_id: job.id,
                    host: job.host.clone(),
                    status: JobStatus::Failed,
                    exit_code: None,
                    output: None,
                    error: Some(e.to_string()),
                    started_at,
                    finished_at,
                }
            }
        }
    }
}
