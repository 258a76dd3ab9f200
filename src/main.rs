use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use xdist_workers::bootstrap::{BootstrapPlan, BootstrapReport, PipFreezeResolver, SshShell};
use xdist_workers::config::{BootstrapConfig, ProvisionConfig, SshConfig, TerminateConfig};
use xdist_workers::manager::CommandWorkerManager;
use xdist_workers::pool::parse_id_list;
use xdist_workers::provisioner::{render_script, Provisioner, EXIT_FAILURE};
use xdist_workers::shutdown::install_shutdown_handler;
use xdist_workers::terminator::{TerminateOutcome, Terminator};

#[derive(Parser, Debug)]
#[command(name = "xdist-workers")]
#[command(version)]
#[command(about = "Provision, bootstrap and tear down pytest-xdist worker pools")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Spin up workers and bootstrap them (configured through XDIST_* variables)
    Up {
        #[command(flatten)]
        state: StateArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Terminate the workers recorded by a previous `up`
    Down {
        #[command(flatten)]
        state: StateArgs,
    },

    /// Print the bootstrap commands for a list of IPs without running them
    Plan {
        /// Worker IPs (comma-separated)
        #[arg(long)]
        ips: String,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Parser, Debug)]
struct StateArgs {
    /// Directory holding pytest_worker_ips.txt and pytest_task_arns.txt
    #[arg(long, default_value = ".")]
    state_dir: PathBuf,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct PlanOutput<'a> {
    jobs: Vec<PlanJobOutput<'a>>,
    legacy_command: String,
}

#[derive(Serialize)]
struct PlanJobOutput<'a> {
    host: &'a str,
    command: &'a str,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_up(state: StateArgs, output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProvisionConfig::from_env()?.with_state_dir(state.state_dir);

    tracing::info!(
        workers = config.worker.count,
        branch = %config.bootstrap.branch,
        tox_env = ?config.bootstrap.tox_env,
        state_dir = %config.state.dir().display(),
        "Starting xdist worker pool"
    );

    let manager = CommandWorkerManager::new(config.manager.clone());
    let shell = SshShell::new(config.ssh.clone());
    let provisioner = Provisioner::new(config, manager, shell, PipFreezeResolver::default());

    let cancel = install_shutdown_handler();
    let report = provisioner.run(&cancel).await?;

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!("Workers: {}", report.pool.ips.join(","));
            print_bootstrap_table(&report.bootstrap);
        }
    }

    if report.is_partial() {
        eprintln!(
            "Error: {} of {} requested workers are usable ({} booted, {} failed to bootstrap)",
            report.bootstrap.succeeded().count(),
            report.requested,
            report.pool.len(),
            report.bootstrap.failed().count()
        );
        std::process::exit(report.exit_code());
    }
    Ok(())
}

fn print_bootstrap_table(report: &BootstrapReport) {
    let summary = report.summary();
    println!(
        "Bootstrap: {} succeeded, {} failed, {} timed out, {} cancelled",
        summary.succeeded, summary.failed, summary.timed_out, summary.cancelled
    );
    if report.outcomes.is_empty() {
        return;
    }

    println!();
    println!("{:<18} {:<11} {:<6} ERROR", "HOST", "STATUS", "EXIT");
    println!("{}", "-".repeat(60));
    for outcome in &report.outcomes {
        let exit = outcome
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let error = outcome
            .error
            .as_deref()
            .and_then(|e| e.lines().last())
            .unwrap_or("");
        println!(
            "{:<18} {:<11} {:<6} {}",
            outcome.host,
            outcome.status.to_string(),
            exit,
            error
        );
    }
}

async fn handle_down(state: StateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = TerminateConfig::from_env()?.with_state_dir(state.state_dir);
    let terminator = Terminator::new(config.state, CommandWorkerManager::new(config.manager));

    match terminator.run().await? {
        TerminateOutcome::NothingToTerminate => println!("No workers to terminate."),
        TerminateOutcome::Terminated { payload } => println!("Terminated: {}", payload),
    }
    Ok(())
}

async fn handle_plan(ips: String, output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let bootstrap = BootstrapConfig::from_lookup(|var| std::env::var(var).ok())?;
    let ssh = SshConfig::from_lookup(|var| std::env::var(var).ok())?;

    let script = render_script(&bootstrap, &PipFreezeResolver::default()).await?;
    let plan = BootstrapPlan::new(&parse_id_list(&ips), &script);
    let legacy_command = plan.legacy_shell_command(&ssh)?;

    match output {
        OutputFormat::Json => {
            let out = PlanOutput {
                jobs: plan
                    .jobs()
                    .iter()
                    .map(|j| PlanJobOutput {
                        host: &j.host,
                        command: &j.command,
                    })
                    .collect(),
                legacy_command,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            if plan.is_empty() {
                println!("No worker IPs given.");
                return Ok(());
            }
            for job in plan.jobs() {
                println!("{}:", job.host);
                for step in script.steps() {
                    println!("  {}", step);
                }
            }
            println!();
            println!("Aggregate shell command:");
            println!("{}", legacy_command);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Up { state, output } => handle_up(state, output).await,
        Commands::Down { state } => handle_down(state).await,
        Commands::Plan { ips, output } => handle_plan(ips, output).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_FAILURE);
    }
}
