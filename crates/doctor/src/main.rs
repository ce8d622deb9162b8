//! infra CLI.
//!
//! Runs health checks against an RKE2 / Kubernetes node and reports which
//! ones failed and why.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use infra_doctor::commands::doctor::DoctorCommand;
use infra_doctor::report::EXIT_ERROR;
use infra_doctor::ui;

/// Infrastructure tooling for RKE2 clusters.
#[derive(Parser)]
#[command(name = "infra", version, about = "Infrastructure tooling for RKE2 clusters")]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// This commands helps you to understand the problem in your cluster.
    ///
    /// Runs the selected checks concurrently. Without any check flag an
    /// interactive checklist is shown. Exits with 2 when any check fails.
    Doctor(DoctorCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,infra_doctor=debug")
    } else {
        EnvFilter::new("warn,infra_doctor=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Doctor(cmd) => cmd.run().await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            ui::print_error(&format!("{e:#}"));
            ExitCode::from(EXIT_ERROR)
        }
    }
}
