use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::executor::{BootstrapExecutor, BootstrapOutcome, JobStatus, RemoteShell};
use super::plan::BootstrapPlan;

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}

/// Every job's outcome, in plan order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub outcomes: Vec<BootstrapOutcome>,
}

impl BootstrapReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &BootstrapOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BootstrapOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(BootstrapOutcome::is_success)
    }

    pub fn summary(&self) -> BootstrapSummary {
        let mut summary = BootstrapSummary {
            total: self.outcomes.len(),
            ..Default::default()
        };
        for outcome in &self.outcomes {
            match outcome.status {
                JobStatus::Succeeded => summary.succeeded += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::TimedOut => summary.timed_out += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// Runs all jobs of a plan concurrently and joins them.
#[derive(Debug)]
pub struct BootstrapGroup<S> {
    executor: BootstrapExecutor<S>,
}

impl<S: RemoteShell> BootstrapGroup<S> {
    pub fn new(executor: BootstrapExecutor<S>) -> Self {
        Self { executor }
    }

    /// Wait for every job, or abort the rest once `cancel` fires.
    ///
    /// A failing job never stops the others. Jobs that did not finish are
    /// reported as cancelled (or failed, if their task panicked).
    pub async fn run(&self, plan: &BootstrapPlan, cancel: &CancellationToken) -> BootstrapReport {
        let jobs = plan.jobs();
        tracing::info!(jobs = jobs.len(), "Starting bootstrap jobs");

        let mut tasks = JoinSet::new();
        for (index, job) in jobs.iter().cloned().enumerate() {
            let executor = self.executor.clone();
            tasks.spawn(async move { (index, executor.execute(&job).await) });
        }

        let mut outcomes: Vec<Option<BootstrapOutcome>> = vec![None; jobs.len()];
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    tracing::warn!(
                        in_flight = tasks.len(),
                        "Shutdown requested, aborting bootstrap jobs"
                    );
                    cancelled = true;
                    tasks.abort_all();
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                    Some(Err(e)) if e.is_panic() => {
                        tracing::error!(error = %e, "Bootstrap task panicked");
                    }
                    Some(Err(_)) => {}
                    None => break,
                },
            }
        }

        let outcomes: Vec<BootstrapOutcome> = outcomes
            .into_iter()
            .zip(jobs)
            .map(|(outcome, job)| {
                outcome.unwrap_or_else(|| {
                    if cancelled {
                        BootstrapOutcome::unfinished(job, JobStatus::Cancelled, "cancelled")
                    } else {
                        BootstrapOutcome::unfinished(job, JobStatus::Failed, "task panicked")
                    }
                })
            })
            .collect();

        let report = BootstrapReport { outcomes };
        let summary = report.summary();
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            cancelled = summary.cancelled,
            "Bootstrap finished"
        );
        report
    }
}
