use std::process::ExitCode;

use clap::Parser;
use rclone_to_b2::cli::{run, Cli, UsageError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing for the CLI; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised");

    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "rclone-to-b2".to_string());
    let cli = Cli::parse();
    tracing::info!("CLI arguments parsed, invoking run");

    // Everything `run` owns (scratch directories, child process) is dropped
    // before the exit code is returned.
    match run(cli).await {
        Ok(()) => {
            tracing::info!("CLI completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) if e.is::<UsageError>() => {
            println!("usage: {program} <source>");
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "CLI exited with error");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}
