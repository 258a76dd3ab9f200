use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::{
    fetch_refspec, resolve_requirement, BootstrapExecutor, BootstrapGroup, BootstrapPlan,
    BootstrapReport, BootstrapScript, PinResolver, RemoteShell,
};
use crate::config::{BootstrapConfig, ProvisionConfig};
use crate::error::{Result, XdistError};
use crate::manager::WorkerManager;
use crate::pool::WorkerPool;

/// Render the remote bootstrap script for the configured branch.
///
/// The Django pin is only looked up when a tox environment is active.
pub async fn render_script<R: PinResolver>(
    config: &BootstrapConfig,
    resolver: &R,
) -> Result<BootstrapScript> {
    let refspec = fetch_refspec(&config.branch);
    let requirement = resolve_requirement(config, resolver).await?;
    tracing::info!(
        branch = %config.branch,
        refspec = %refspec,
        requirement = %requirement,
        "Rendered bootstrap script"
    );
    Ok(BootstrapScript::render(config, &refspec, &requirement))
}

/// `up` exit status when every requested worker is up and bootstrapped.
pub const EXIT_OK: i32 = 0;
/// `up` exit status when provisioning or bootstrap failed outright.
pub const EXIT_FAILURE: i32 = 1;
/// `up` exit status when the pool is up but not every worker is usable.
pub const EXIT_PARTIAL_BOOTSTRAP: i32 = 2;

/// What `up` produced: the pool and how each worker's bootstrap went.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    /// Worker count asked of the manager.
    pub requested: u32,
    pub pool: WorkerPool,
    pub bootstrap: BootstrapReport,
}

impl ProvisionReport {
    /// The pool is up, but not every requested worker is usable.
    ///
    /// An empty or short pool counts as partial even though every bootstrap
    /// that did run may have succeeded.
    pub fn is_partial(&self) -> bool {
        self.pool.is_empty()
            || self.pool.len() != self.requested as usize
            || !self.bootstrap.all_succeeded()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_partial() {
            EXIT_PARTIAL_BOOTSTRAP
        } else {
            EXIT_OK
        }
    }
}

/// Brings a worker pool up and bootstraps every worker.
pub struct Provisioner<M, S, R> {
    config: ProvisionConfig,
    manager: M,
    group: BootstrapGroup<S>,
    resolver: R,
}

impl<M, S, R> Provisioner<M, S, R>
where
    M: WorkerManager,
    S: RemoteShell,
    R: PinResolver,
{
    pub fn new(config: ProvisionConfig, manager: M, shell: S, resolver: R) -> Self {
        let executor = BootstrapExecutor::new(shell, config.ssh.job_timeout);
        Self {
            config,
            manager,
            group: BootstrapGroup::new(executor),
            resolver,
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Provision, then bootstrap all workers concurrently.
    ///
    /// A failing `up` aborts before any bootstrap starts. Individual bootstrap
    /// failures do not make this return `Err`; they are in the report.
    /// Cancelling `cancel` stops whichever phase is running: before or during
    /// `up` this returns [`XdistError::Cancelled`], during bootstrap the
    /// unfinished jobs are reported as cancelled.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ProvisionReport> {
        if cancel.is_cancelled() {
            return Err(XdistError::Cancelled("pin lookup"));
        }

        // Resolved before `up` so a failed lookup does not leave instances behind
        let script = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(XdistError::Cancelled("pin lookup")),
            script = render_script(&self.config.bootstrap, &self.resolver) => script?,
        };

        let pool = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(
                    state_dir = %self.config.state.dir().display(),
                    "Cancelled during worker manager up, workers may already exist; run `down` once state files appear"
                );
                return Err(XdistError::Cancelled("worker manager up"));
            }
            pool = self.manager.up(&self.config.worker, &self.config.state) => pool?,
        };

        if pool.is_empty() {
            tracing::warn!("Worker manager reported no worker IPs, nothing to bootstrap");
        }
        if pool.len() != self.config.worker.count as usize {
            tracing::warn!(
                requested = self.config.worker.count,
                received = pool.len(),
                "Worker count differs from request"
            );
        }

        let plan = BootstrapPlan::new(&pool.ips, &script);
        let bootstrap = self.group.run(&plan, cancel).await;

        Ok(ProvisionReport {
            requested: self.config.worker.count,
            pool,
            bootstrap,
        })
    }
}
