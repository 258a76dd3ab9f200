use serde::Serialize;

use crate::error::Result;
use crate::manager::WorkerManager;
use crate::pool::{StateFiles, WorkerPool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminateOutcome {
    /// No record of a live pool; treated as already torn down
    NothingToTerminate,
    Terminated { payload: String },
}

/// Tears down a pool recorded by a previous `up`.
pub struct Terminator<M> {
    state: StateFiles,
    manager: M,
}

impl<M: WorkerManager> Terminator<M> {
    pub fn new(state: StateFiles, manager: M) -> Self {
        Self { state, manager }
    }

    /// Terminate whatever the task ARN file names. A missing file is a no-op.
    pub async fn run(&self) -> Result<TerminateOutcome> {
        let path = self.state.task_arns_path();
        match self.state.read_task_arns_payload().await? {
            None => {
                tracing::info!(path = %path.display(), "No task ARN file, nothing to terminate");
                Ok(TerminateOutcome::NothingToTerminate)
            }
            Some(payload) if payload.is_empty() => {
                tracing::warn!(path = %path.display(), "Task ARN file is empty, nothing to terminate");
                Ok(TerminateOutcome::NothingToTerminate)
            }
            Some(payload) => self.terminate_payload(payload).await,
        }
    }

    /// Terminate a pool held in memory.
    pub async fn terminate_pool(&self, pool: &WorkerPool) -> Result<TerminateOutcome> {
        if pool.task_arns.is_empty() {
            tracing::warn!("Pool has no task ARNs, nothing to terminate");
            return Ok(TerminateOutcome::NothingToTerminate);
        }
        self.terminate_payload(pool.termination_payload()).await
    }

    async fn terminate_payload(&self, payload: String) -> Result<TerminateOutcome> {
        tracing::info!(task_arns = %payload, "Terminating workers");
        self.manager.down(&payload).await?;
        tracing::info!("Termination requested");
        Ok(TerminateOutcome::Terminated { payload })
    }
}
