use std::future::Future;
use std::process::Stdio;

use tokio::process::Command;

use super::plan::Requirement;
use crate::config::BootstrapConfig;
use crate::error::{Result, XdistError};

/// Find the exact Django pin in `pip freeze` output.
pub fn find_django_pin(freeze_output: &str) -> Option<String> {
    freeze_output.lines().map(str::trim).find_map(|line| {
        let (name, version) = line.split_once("==")?;
        (name.trim().eq_ignore_ascii_case("django") && !version.trim().is_empty())
            .then(|| line.to_string())
    })
}

/// Looks up the Django pin installed in the local environment.
pub trait PinResolver: Send + Sync {
    fn django_pin(&self) -> impl Future<Output = Result<String>> + Send;
}

/// Asks pip what is installed.
#[derive(Debug, Clone)]
pub struct PipFreezeResolver {
    program: String,
}

impl Default for PipFreezeResolver {
    fn default() -> Self {
        Self::new("pip")
    }
}

impl PipFreezeResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PinResolver for PipFreezeResolver {
    async fn django_pin(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("freeze")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(XdistError::PinLookupFailed(format!(
                "`{} freeze` exited with {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        find_django_pin(&stdout)
            .ok_or_else(|| XdistError::DjangoPinNotFound(format!("{} freeze", self.program)))
    }
}

/// Pick the Django requirement for the workers.
///
/// Without an active tox environment the fixed requirements file is used and
/// the resolver is never called.
pub async fn resolve_requirement<R: PinResolver>(
    config: &BootstrapConfig,
    resolver: &R,
) -> Result<Requirement> {
    if !config.tox_env_active() {
        return Ok(Requirement::File(config.django_requirements_file.clone()));
    }

    let pin = resolver.django_pin().await?;
    tracing::info!(tox_env = ?config.tox_env, pin = %pin, "Reusing installed Django pin");
    Ok(Requirement::Pinned(pin))
}
