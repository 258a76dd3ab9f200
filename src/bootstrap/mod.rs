//! Worker bootstrap: turn a pool of fresh instances into test workers.
//!
//! Every worker gets the same remote command: clone the repository, fetch
//! and check out the branch under test, activate the virtualenv, install
//! dependencies and create the reports directory.
//!
//! # Components
//!
//! - [`plan`]: fetch refspec, requirement line, remote script and one
//!   [`BootstrapJob`] per IP
//! - [`requirements`]: Django pin lookup for tox runs
//! - [`executor`]: runs a job over SSH and captures its outcome
//! - [`group`]: fans jobs out on a `JoinSet` and aggregates the outcomes
//!
//! # Execution Flow
//!
//! 1. [`BootstrapPlan::new`] builds one job per worker IP
//! 2. [`BootstrapGroup::run`] spawns every job concurrently
//! 3. [`BootstrapExecutor::execute`] runs `ssh <user>@<ip> <script>`
//! 4. The group joins all jobs and returns a [`BootstrapReport`]

pub mod executor;
pub mod group;
pub mod plan;
pub mod requirements;

pub use executor::{BootstrapExecutor, BootstrapOutcome, JobStatus, RemoteShell, SshShell};
pub use group::{BootstrapGroup, BootstrapReport, BootstrapSummary};
pub use plan::{fetch_refspec, BootstrapJob, BootstrapPlan, BootstrapScript, Requirement};
pub use requirements::{find_django_pin, resolve_requirement, PinResolver, PipFreezeResolver};
