use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pool::StateFiles;

pub const DEFAULT_WORKER_MANAGER: &str = "python scripts/xdist/pytest_worker_manager.py";

/// Value of `TOX_ENV` that means "no tox environment".
pub const TOX_ENV_NULL: &str = "null";

/// Reads variables from an environment source and remembers every problem,
/// so validation reports all missing variables at once.
pub(crate) struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
    missing: Vec<String>,
    invalid: Option<ConfigError>,
}

impl<'a> EnvReader<'a> {
    pub(crate) fn new(lookup: &'a dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            lookup,
            missing: Vec::new(),
            invalid: None,
        }
    }

    /// Empty and whitespace-only values count as unset.
    pub(crate) fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn required(&mut self, var: &str) -> Option<String> {
        let value = self.optional(var);
        if value.is_none() {
            self.missing.push(var.to_string());
        }
        value
    }

    pub(crate) fn invalid(&mut self, var: &str, reason: impl Into<String>) {
        // Keep the first one; missing variables win anyway.
        if self.invalid.is_none() {
            self.invalid = Some(ConfigError::Invalid {
                var: var.to_string(),
                reason: reason.into(),
            });
        }
    }

    pub(crate) fn finish(self) -> Result<(), ConfigError> {
        if !self.missing.is_empty() {
            return Err(ConfigError::Missing(self.missing));
        }
        match self.invalid {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Parameters handed to the worker manager's `up` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub count: u32,
    pub ami: String,
    pub instance_type: String,
    pub subnet: String,
    /// One or more security group ids
    pub security_groups: Vec<String>,
    pub key_name: String,
    pub iam_profile_arn: String,
    /// AWS region; the worker manager picks its own default when unset
    pub region: Option<String>,
}

impl WorkerSpec {
    fn read(env: &mut EnvReader<'_>) -> Self {
        let count = match env.required("XDIST_NUM_WORKERS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) => {
                    env.invalid("XDIST_NUM_WORKERS", "must be at least 1");
                    0
                }
                Ok(n) => n,
                Err(e) => {
                    env.invalid("XDIST_NUM_WORKERS", format!("`{}` is not a count: {}", raw, e));
                    0
                }
            },
            None => 0,
        };

        let ami = env.required("XDIST_WORKER_AMI").unwrap_or_default();
        let instance_type = env.required("XDIST_INSTANCE_TYPE").unwrap_or_default();
        let subnet = env.required("XDIST_WORKER_SUBNET").unwrap_or_default();
        let security_groups = env
            .required("XDIST_WORKER_SECURITY_GROUP")
            .map(|raw| {
                raw.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            count,
            ami,
            instance_type,
            subnet,
            security_groups,
            key_name: env.required("XDIST_WORKER_KEY_NAME").unwrap_or_default(),
            iam_profile_arn: env
                .required("XDIST_WORKER_IAM_PROFILE_ARN")
                .unwrap_or_default(),
            region: env.optional("XDIST_REGION"),
        }
    }
}

/// What every worker runs after it boots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Git branch under test
    pub branch: String,
    /// Raw `TOX_ENV`; `None` when unset
    pub tox_env: Option<String>,
    pub repo_url: String,
    /// Directory the clone lands in on the worker
    pub repo_dir: String,
    /// Activation script, relative to `repo_dir`
    pub venv_activate: String,
    pub django_requirements_file: String,
    pub testing_requirements_file: String,
    pub reports_dir: String,
}

impl BootstrapConfig {
    /// Defaults for the given branch with no tox environment.
    pub fn for_branch(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            tox_env: None,
            repo_url: "https://github.com/edx/edx-platform.git".to_string(),
            repo_dir: "edx-platform".to_string(),
            venv_activate: "../edx-venv/bin/activate".to_string(),
            django_requirements_file: "requirements/edx/django.txt".to_string(),
            testing_requirements_file: "requirements/edx/testing.txt".to_string(),
            reports_dir: "reports".to_string(),
        }
    }

    /// True when a tox job already picked the Django version to test against.
    pub fn tox_env_active(&self) -> bool {
        matches!(self.tox_env.as_deref(), Some(env) if env != TOX_ENV_NULL)
    }

    fn read(env: &mut EnvReader<'_>) -> Self {
        let branch = env.required("XDIST_GIT_BRANCH").unwrap_or_default();
        let mut cfg = Self::for_branch(branch);
        cfg.tox_env = env.optional("TOX_ENV");
        if let Some(url) = env.optional("XDIST_REPO_URL") {
            cfg.repo_url = url;
        }
        cfg
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(&lookup);
        let cfg = Self::read(&mut env);
        env.finish()?;
        Ok(cfg)
    }
}

/// How bootstrap scripts reach the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub program: String,
    pub user: String,
    /// Passed before the destination
    pub options: Vec<String>,
    /// Per-worker limit; `None` waits forever
    pub job_timeout: Option<Duration>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            user: "jenkins".to_string(),
            // Fresh instances have unknown host keys
            options: vec!["-o".to_string(), "StrictHostKeyChecking=no".to_string()],
            job_timeout: None,
        }
    }
}

impl SshConfig {
    pub fn destination(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }

    fn read(env: &mut EnvReader<'_>) -> Self {
        let mut cfg = Self::default();
        if let Some(user) = env.optional("XDIST_SSH_USER") {
            cfg.user = user;
        }
        if let Some(raw) = env.optional("XDIST_BOOTSTRAP_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => cfg.job_timeout = Some(Duration::from_secs(secs)),
                Ok(_) => env.invalid("XDIST_BOOTSTRAP_TIMEOUT_SECS", "must be at least 1"),
                Err(e) => env.invalid(
                    "XDIST_BOOTSTRAP_TIMEOUT_SECS",
                    format!("`{}` is not a number of seconds: {}", raw, e),
                ),
            }
        }
        cfg
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(&lookup);
        let cfg = Self::read(&mut env);
        env.finish()?;
        Ok(cfg)
    }
}

/// Command line of the external worker manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub program: String,
    /// Leading arguments placed before the action flags
    pub args: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::parse(DEFAULT_WORKER_MANAGER).unwrap_or_else(|| Self {
            program: "python".to_string(),
            args: Vec::new(),
        })
    }
}

impl ManagerConfig {
    /// Split a command line with POSIX shell quoting rules.
    ///
    /// `None` if it is blank or its quotes do not balance.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = shlex::split(command_line)?.into_iter();
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    fn read(env: &mut EnvReader<'_>) -> Self {
        let Some(raw) = env.optional("XDIST_WORKER_MANAGER") else {
            return Self::default();
        };
        match Self::parse(&raw) {
            Some(config) => config,
            None => {
                env.invalid("XDIST_WORKER_MANAGER", "not a valid shell command line");
                Self::default()
            }
        }
    }
}

/// Everything `up` needs.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub worker: WorkerSpec,
    pub bootstrap: BootstrapConfig,
    pub ssh: SshConfig,
    pub manager: ManagerConfig,
    pub state: StateFiles,
}

impl ProvisionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Validate every variable before failing, listing all missing ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(&lookup);
        let worker = WorkerSpec::read(&mut env);
        let bootstrap = BootstrapConfig::read(&mut env);
        let ssh = SshConfig::read(&mut env);
        let manager = ManagerConfig::read(&mut env);
        env.finish()?;

        Ok(Self {
            worker,
            bootstrap,
            ssh,
            manager,
            state: StateFiles::default(),
        })
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state = StateFiles::new(dir);
        self
    }
}

/// Everything `down` needs. Nothing is required.
#[derive(Debug, Clone, Default)]
pub struct TerminateConfig {
    pub manager: ManagerConfig,
    pub state: StateFiles,
}

impl TerminateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(&lookup);
        let manager = ManagerConfig::read(&mut env);
        env.finish()?;

        Ok(Self {
            manager,
            state: StateFiles::default(),
        })
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state = StateFiles::new(dir);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("XDIST_NUM_WORKERS", "3"),
            ("XDIST_WORKER_AMI", "ami-123"),
            ("XDIST_INSTANCE_TYPE", "c5d.large"),
            ("XDIST_WORKER_SUBNET", "subnet-1"),
            ("XDIST_WORKER_SECURITY_GROUP", "sg-1 sg-2"),
            ("XDIST_WORKER_KEY_NAME", "jenkins-worker"),
            ("XDIST_WORKER_IAM_PROFILE_ARN", "arn:aws:iam::1:instance-profile/w"),
            ("XDIST_GIT_BRANCH", "feature/foo"),
        ])
    }

    fn lookup(env: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |var: &str| env.get(var).map(|v| v.to_string())
    }

    #[test]
    fn provision_config_from_full_env() {
        let cfg = ProvisionConfig::from_lookup(lookup(full_env())).unwrap();
        assert_eq!(cfg.worker.count, 3);
        assert_eq!(cfg.worker.ami, "ami-123");
        assert_eq!(cfg.worker.security_groups, vec!["sg-1", "sg-2"]);
        assert_eq!(cfg.worker.region, None);
        assert_eq!(cfg.bootstrap.branch, "feature/foo");
        assert!(cfg.bootstrap.tox_env.is_none());
        assert_eq!(cfg.ssh, SshConfig::default());
        assert_eq!(cfg.manager.program, "python");
        assert_eq!(cfg.manager.args, vec!["scripts/xdist/pytest_worker_manager.py"]);
    }

    #[test]
    fn missing_variables_are_all_reported() {
        let mut env = full_env();
        env.remove("XDIST_WORKER_AMI");
        env.remove("XDIST_GIT_BRANCH");
        env.insert("XDIST_WORKER_KEY_NAME", "   ");

        let err = ProvisionConfig::from_lookup(lookup(env)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![
                "XDIST_WORKER_AMI".to_string(),
                "XDIST_WORKER_KEY_NAME".to_string(),
                "XDIST_GIT_BRANCH".to_string(),
            ])
        );
    }

    #[test]
    fn empty_environment_lists_every_required_variable() {
        let err = ProvisionConfig::from_lookup(|_| None).unwrap_err();
        match err {
            ConfigError::Missing(vars) => assert_eq!(vars.len(), 8),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn worker_count_must_be_positive_number() {
        let mut env = full_env();
        env.insert("XDIST_NUM_WORKERS", "zero");
        let err = ProvisionConfig::from_lookup(lookup(env.clone())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "XDIST_NUM_WORKERS"));

        env.insert("XDIST_NUM_WORKERS", "0");
        let err = ProvisionConfig::from_lookup(lookup(env)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "XDIST_NUM_WORKERS"));
    }

    #[test]
    fn missing_wins_over_invalid() {
        let mut env = full_env();
        env.insert("XDIST_NUM_WORKERS", "many");
        env.remove("XDIST_WORKER_SUBNET");
        let err = ProvisionConfig::from_lookup(lookup(env)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec!["XDIST_WORKER_SUBNET".to_string()])
        );
    }

    #[test]
    fn optional_overrides_are_applied() {
        let mut env = full_env();
        env.insert("TOX_ENV", "py27-django111");
        env.insert("XDIST_REGION", "us-west-2");
        env.insert("XDIST_SSH_USER", "ubuntu");
        env.insert("XDIST_BOOTSTRAP_TIMEOUT_SECS", "600");
        env.insert("XDIST_WORKER_MANAGER", "./manager --profile ci");
        env.insert("XDIST_REPO_URL", "https://example.com/repo.git");

        let cfg = ProvisionConfig::from_lookup(lookup(env)).unwrap();
        assert_eq!(cfg.bootstrap.tox_env.as_deref(), Some("py27-django111"));
        assert!(cfg.bootstrap.tox_env_active());
        assert_eq!(cfg.bootstrap.repo_url, "https://example.com/repo.git");
        assert_eq!(cfg.worker.region.as_deref(), Some("us-west-2"));
        assert_eq!(cfg.ssh.user, "ubuntu");
        assert_eq!(cfg.ssh.job_timeout, Some(Duration::from_secs(600)));
        assert_eq!(cfg.manager.program, "./manager");
        assert_eq!(cfg.manager.args, vec!["--profile", "ci"]);
    }

    #[test]
    fn bad_timeout_is_invalid() {
        let mut env = full_env();
        env.insert("XDIST_BOOTSTRAP_TIMEOUT_SECS", "soon");
        let err = ProvisionConfig::from_lookup(lookup(env)).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref var, .. } if var == "XDIST_BOOTSTRAP_TIMEOUT_SECS")
        );
    }

    #[test]
    fn tox_env_null_is_inactive() {
        let mut cfg = BootstrapConfig::for_branch("master");
        assert!(!cfg.tox_env_active());
        cfg.tox_env = Some("null".to_string());
        assert!(!cfg.tox_env_active());
        cfg.tox_env = Some("py35-django20".to_string());
        assert!(cfg.tox_env_active());
    }

    #[test]
    fn bootstrap_config_only_needs_branch() {
        let cfg = BootstrapConfig::from_lookup(|var| {
            (var == "XDIST_GIT_BRANCH").then(|| "master".to_string())
        })
        .unwrap();
        assert_eq!(cfg.branch, "master");

        let err = BootstrapConfig::from_lookup(|_| None).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec!["XDIST_GIT_BRANCH".to_string()])
        );
    }

    #[test]
    fn manager_config_parse() {
        assert!(ManagerConfig::parse("   ").is_none());
        let cfg = ManagerConfig::parse("manager").unwrap();
        assert_eq!(cfg.program, "manager");
        assert!(cfg.args.is_empty());
    }

    #[test]
    fn manager_config_keeps_quoted_paths_whole() {
        let line = r#"python "/opt/ci tools/pytest_worker_manager.py" --verbose"#;
        let cfg = ManagerConfig::parse(line).unwrap();
        assert_eq!(cfg.program, "python");
        assert_eq!(
            cfg.args,
            vec!["/opt/ci tools/pytest_worker_manager.py", "--verbose"]
        );
    }

    #[test]
    fn unbalanced_manager_quotes_are_invalid() {
        assert!(ManagerConfig::parse("python 'scripts/manager.py").is_none());

        let err = TerminateConfig::from_lookup(|var| {
            (var == "XDIST_WORKER_MANAGER").then(|| "python 'scripts/manager.py".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "XDIST_WORKER_MANAGER"));
    }

    #[test]
    fn terminate_config_needs_nothing() {
        let cfg = TerminateConfig::from_lookup(|_| None)
            .unwrap()
            .with_state_dir("/tmp/state");
        assert_eq!(cfg.manager, ManagerConfig::default());
        assert_eq!(cfg.state.dir(), std::path::Path::new("/tmp/state"));
    }

    #[test]
    fn ssh_destination() {
        let cfg = SshConfig::default();
        assert_eq!(cfg.destination("10.0.0.1"), "jenkins@10.0.0.1");
    }
}
