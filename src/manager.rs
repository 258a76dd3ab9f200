use std::future::Future;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::{ManagerConfig, WorkerSpec};
use crate::error::{Result, XdistError};
use crate::pool::{StateFiles, WorkerPool};

/// The program that talks to the cloud provider.
///
/// `up` creates the instances and records them in the state files; `down`
/// terminates whatever the payload names.
pub trait WorkerManager: Send + Sync {
    fn up(
        &self,
        spec: &WorkerSpec,
        state: &StateFiles,
    ) -> impl Future<Output = Result<WorkerPool>> + Send;

    fn down(&self, payload: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Runs the external worker manager (`-a up` / `-a down`) as a child process.
#[derive(Debug, Clone)]
pub struct CommandWorkerManager {
    config: ManagerConfig,
}

impl CommandWorkerManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self { config }
    }

    pub fn up_args(spec: &WorkerSpec) -> Vec<String> {
        let mut args = vec![
            "-a".to_string(),
            "up".to_string(),
            "-n".to_string(),
            spec.count.to_string(),
            "-ami".to_string(),
            spec.ami.clone(),
            "-type".to_string(),
            spec.instance_type.clone(),
            "-s".to_string(),
            spec.subnet.clone(),
            "-sg".to_string(),
        ];
        args.extend(spec.security_groups.iter().cloned());
        args.push("-key".to_string());
        args.push(spec.key_name.clone());
        args.push("-iam".to_string());
        args.push(spec.iam_profile_arn.clone());

        if let Some(ref region) = spec.region {
            args.push("-g".to_string());
            args.push(region.clone());
        }
        args
    }

    pub fn down_args(payload: &str) -> Vec<String> {
        vec![
            "-a".to_string(),
            "down".to_string(),
            "--task_arns".to_string(),
            payload.to_string(),
        ]
    }

    async fn invoke(
        &self,
        action: &'static str,
        args: Vec<String>,
        current_dir: Option<&Path>,
    ) -> Result<()> {
        tracing::info!(action, program = %self.config.program, "Invoking worker manager");

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = current_dir {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        for line in stdout.lines().chain(stderr.lines()) {
            tracing::info!(action, "manager: {}", line);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(XdistError::ManagerFailed {
                action,
                exit_code: output.status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

impl WorkerManager for CommandWorkerManager {
    async fn up(&self, spec: &WorkerSpec, state: &StateFiles) -> Result<WorkerPool> {
        tracing::info!(
            count = spec.count,
            ami = %spec.ami,
            instance_type = %spec.instance_type,
            "Requesting workers"
        );

        tokio::fs::create_dir_all(state.dir()).await?;
        // The manager writes its files into its working directory
        self.invoke("up", Self::up_args(spec), Some(state.dir()))
            .await?;

        let pool = state.read_pool().await?;
        tracing::info!(
            workers = pool.len(),
            ips = %pool.ips.join(","),
            "Workers are up"
        );
        Ok(pool)
    }

    async fn down(&self, payload: &str) -> Result<()> {
        self.invoke("down", Self::down_args(payload), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WorkerSpec {
        WorkerSpec {
            count: 2,
            ami: "ami-1".to_string(),
            instance_type: "m5.large".to_string(),
            subnet: "subnet-9".to_string(),
            security_groups: vec!["sg-a".to_string(), "sg-b".to_string()],
            key_name: "key".to_string(),
            iam_profile_arn: "arn:iam".to_string(),
            region: None,
        }
    }

    #[test]
    fn up_args_follow_manager_flags() {
        let args = CommandWorkerManager::up_args(&spec());
        assert_eq!(
            args,
            vec![
                "-a", "up", "-n", "2", "-ami", "ami-1", "-type", "m5.large", "-s", "subnet-9",
                "-sg", "sg-a", "sg-b", "-key", "key", "-iam", "arn:iam",
            ]
        );
    }

    #[test]
    fn up_args_include_region_when_set() {
        let mut spec = spec();
        spec.region = Some("eu-west-1".to_string());
        let args = CommandWorkerManager::up_args(&spec);
        assert_eq!(&args[args.len() - 2..], &["-g", "eu-west-1"]);
    }

    #[test]
    fn down_args_pass_payload_verbatim() {
        assert_eq!(
            CommandWorkerManager::down_args("arn:a,arn:b"),
            vec!["-a", "down", "--task_arns", "arn:a,arn:b"]
        );
    }
}
