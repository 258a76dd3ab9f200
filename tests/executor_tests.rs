//! Executor tests that run real processes.
//!
//! `SshShell` is pointed at `sh -c` so the argument layout and output
//! handling are exercised without a remote host: `sh -c 'body' $0 $1`
//! receives the ssh destination as `$0` and the script as `$1`.

use std::time::Duration;

use xdist_workers::bootstrap::{BootstrapExecutor, BootstrapJob, JobStatus, SshShell};
use xdist_workers::config::SshConfig;

fn sh_as_ssh(body: &str) -> SshConfig {
    SshConfig {
        program: "sh".to_string(),
        user: "jenkins".to_string(),
        options: vec!["-c".to_string(), body.to_string()],
        job_timeout: None,
    }
}

/// Runs the job's script locally; `$0` is the destination.
fn local_executor(timeout: Option<Duration>) -> BootstrapExecutor<SshShell> {
    BootstrapExecutor::new(SshShell::new(sh_as_ssh("eval \"$1\"")), timeout)
}

#[tokio::test]
async fn test_destination_and_script_reach_the_shell() {
    let executor = BootstrapExecutor::new(
        SshShell::new(sh_as_ssh("echo \"$0|$1\"")),
        None,
    );
    let job = BootstrapJob::new("10.0.0.1", "mkdir reports");

    let outcome = executor.execute(&job).await;

    assert_eq!(outcome.job_id, job.id);
    assert_eq!(outcome.host, "10.0.0.1");
    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.output, Some("jenkins@10.0.0.1|mkdir reports\n".to_string()));
    assert!(outcome.error.is_none());
    assert_eq!(outcome.exit_code, Some(0));
}

#[tokio::test]
async fn test_execute_empty_output() {
    let executor = local_executor(None);
    let job = BootstrapJob::new("10.0.0.1", "true");

    let outcome = executor.execute(&job).await;

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert!(outcome.output.is_none());
    assert!(outcome.error.is_none());
    assert!(outcome.finished_at >= outcome.started_at);
}

#[tokio::test]
async fn test_execute_failure_reports_stderr() {
    let executor = local_executor(None);
    let job = BootstrapJob::new("10.0.0.2", "echo 'fatal: repository not found' >&2; exit 128");

    let outcome = executor.execute(&job).await;

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.exit_code, Some(128));
    assert!(outcome.error.unwrap().contains("repository not found"));
}

#[tokio::test]
async fn test_execute_failure_without_stderr_reports_exit_code() {
    let executor = local_executor(None);
    let job = BootstrapJob::new("10.0.0.2", "exit 3");

    let outcome = executor.execute(&job).await;

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("Exit code: Some(3)"));
}

#[tokio::test]
async fn test_missing_ssh_program_is_a_failed_outcome() {
    let mut config = SshConfig::default();
    config.program = "nonexistent_ssh_binary_12345".to_string();
    let executor = BootstrapExecutor::new(SshShell::new(config), None);
    let job = BootstrapJob::new("10.0.0.3", "true");

    let outcome = executor.execute(&job).await;

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.exit_code.is_none());
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn test_execute_times_out() {
    let executor = local_executor(Some(Duration::from_millis(200)));
    let job = BootstrapJob::new("10.0.0.4", "sleep 5");

    let outcome = executor.execute(&job).await;

    assert_eq!(outcome.status, JobStatus::TimedOut);
    assert!(outcome.exit_code.is_none());
    assert!(outcome.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_multi_step_script_runs_in_order() {
    let executor = local_executor(None);
    let job = BootstrapJob::new("10.0.0.5", "echo one; echo two; echo three");

    let outcome = executor.execute(&job).await;

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.output.as_deref(), Some("one\ntwo\nthree\n"));
}
