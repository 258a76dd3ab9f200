use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::config::{BootstrapConfig, SshConfig};
use crate::error::{Result, XdistError};

/// Ref passed to `git fetch` after the shallow clone of master.
///
/// Any branch other than master is mapped onto a local ref of the same name,
/// since a tag-less shallow fetch would otherwise leave nothing to check out.
pub fn fetch_refspec(branch: &str) -> String {
    if branch == "master" {
        branch.to_string()
    } else {
        format!("{}:{}", branch, branch)
    }
}

/// Where the worker's Django version comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Requirement {
    /// `-r <file>`
    File(String),
    /// Exact pin reused from the local environment, e.g. `Django==1.11.15`
    Pinned(String),
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::File(path) => write!(f, "-r {}", path),
            Requirement::Pinned(pin) => write!(f, "{}", pin),
        }
    }
}

/// Remote command run on every worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapScript {
    steps: Vec<String>,
}

impl BootstrapScript {
    pub fn render(config: &BootstrapConfig, refspec: &str, requirement: &Requirement) -> Self {
        let steps = vec![
            format!(
                "git clone --branch master --depth 1 --no-tags -q {}",
                config.repo_url
            ),
            format!("cd {}", config.repo_dir),
            format!("git fetch --depth=1 --no-tags -q origin {}", refspec),
            format!("git checkout -q {}", config.branch),
            format!("source {}", config.venv_activate),
            format!(
                "pip install -q {} -r {}",
                requirement, config.testing_requirements_file
            ),
            format!("mkdir {}", config.reports_dir),
        ];
        Self { steps }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn as_command(&self) -> String {
        self.steps.join("; ")
    }
}

/// One worker's bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapJob {
    pub id: Uuid,
    pub host: String,
    pub command: String,
}

impl BootstrapJob {
    pub fn new(host: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            command: command.into(),
        }
    }
}

/// All bootstrap jobs for a pool, one per IP in IP order.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapPlan {
    jobs: Vec<BootstrapJob>,
}

impl BootstrapPlan {
    pub fn new(ips: &[String], script: &BootstrapScript) -> Self {
        let command = script.as_command();
        let jobs = ips
            .iter()
            .map(|ip| BootstrapJob::new(ip.as_str(), command.as_str()))
            .collect();
        Self { jobs }
    }

    pub fn jobs(&self) -> &[BootstrapJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Equivalent single shell line: every ssh backgrounded, then `wait`.
    pub fn legacy_shell_command(&self, ssh: &SshConfig) -> Result<String> {
        let mut cmd = String::new();
        for job in &self.jobs {
            let destination = ssh.destination(&job.host);
            let words = std::iter::once(ssh.program.as_str())
                .chain(ssh.options.iter().map(String::as_str))
                .chain([destination.as_str(), job.command.as_str()]);
            let line = shlex::try_join(words).map_err(|e| XdistError::Quote(e.to_string()))?;
            cmd.push_str(&line);
            cmd.push_str(" & ");
        }
        cmd.push_str("wait");
        Ok(cmd)
    }
}
