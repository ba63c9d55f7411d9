//! Command-line surface of `rclone-to-b2`.
//!
//! This module only collects settings and wires the real clients together:
//! the environment bootstrap, the Vault client, the rclone engine and the
//! Pushgateway client. The pipeline itself lives in `rclone-to-b2-core`.
//!
//! Defaults for the deployment-specific flags are baked in at build time from
//! the `RCLONE_TO_B2_DEFAULT_*` environment variables of the build.
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rclone_to_b2_core::config::{Environment, JobSettings, SOURCE_DIR_VAR};
use rclone_to_b2_core::credential::{connect_secret_store, DiscoveryMode};
use rclone_to_b2_core::error::JobError;
use rclone_to_b2_core::pushgateway::PushGateway;
use rclone_to_b2_core::rclone::RcloneEngine;
use rclone_to_b2_core::synchronise::synchronise;

use crate::load_config::load_env_file;

const DEFAULT_VAULT_MATERIAL: &str = match option_env!("RCLONE_TO_B2_DEFAULT_VAULT_MATERIAL") {
    Some(v) => v,
    None => "",
};
const DEFAULT_B2_BUCKET: &str = match option_env!("RCLONE_TO_B2_DEFAULT_B2_BUCKET") {
    Some(v) => v,
    None => "",
};
const DEFAULT_INSTANCE: &str = match option_env!("RCLONE_TO_B2_DEFAULT_INSTANCE") {
    Some(v) => v,
    None => "",
};
const DEFAULT_PUSHGATEWAY: &str = match option_env!("RCLONE_TO_B2_DEFAULT_PUSHGATEWAY") {
    Some(v) => v,
    None => "",
};

pub const DEFAULT_JOB: &str = "rcloneReporter";
pub const DEFAULT_ENV_FILE: &str = "/etc/default/restic-backup.json";

/// Mirror a local directory into a B2 bucket and report the run to a Pushgateway.
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "rclone-to-b2",
    version,
    about = "Mirror a local directory into a Backblaze B2 bucket with rclone and push run metrics"
)]
pub struct Cli {
    /// Directory to mirror. Defaults to $RCLONE_TO_B2_FROM.
    pub source: Option<PathBuf>,

    /// Path to Vault material containing the B2 credential
    #[clap(long = "vault-material", default_value = DEFAULT_VAULT_MATERIAL)]
    pub vault_material: String,

    /// B2 bucket name for the sync destination
    #[clap(long = "b2-bucket", default_value = DEFAULT_B2_BUCKET)]
    pub b2_bucket: String,

    /// Instance label for the pushgateway
    #[clap(long, default_value = DEFAULT_INSTANCE)]
    pub instance: String,

    /// URL of the pushgateway
    #[clap(long, default_value = DEFAULT_PUSHGATEWAY)]
    pub pushgateway: String,

    /// Job name label for the pushgateway
    #[clap(long, default_value = DEFAULT_JOB)]
    pub job: String,

    /// Disable autodiscovery of the Vault host
    #[clap(long = "no-discover-vault")]
    pub no_discover_vault: bool,

    /// JSON file with environment variables to inject at start; skipped if absent, disabled if empty
    #[clap(long = "env-file", default_value = DEFAULT_ENV_FILE)]
    pub env_file: String,
}

/// No source directory was given and none is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageError;

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no source directory given and {SOURCE_DIR_VAR} is not set")
    }
}

impl std::error::Error for UsageError {}

/// The positional source wins; otherwise the bootstrapped environment decides.
pub fn resolve_source(source: Option<PathBuf>, env: &Environment) -> Result<PathBuf, UsageError> {
    source
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| env.get_non_empty(SOURCE_DIR_VAR).map(PathBuf::from))
        .ok_or(UsageError)
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let env = load_env_file(&cli.env_file)
        .with_context(|| format!("Error loading environment file {}", cli.env_file))?;
    let source_dir = resolve_source(cli.source, &env)?;

    let config = JobSettings {
        source_dir,
        vault_material: cli.vault_material,
        bucket: cli.b2_bucket,
        instance: cli.instance,
        push_gateway: cli.pushgateway,
        job: cli.job,
        discovery: DiscoveryMode::from_no_discover_flag(cli.no_discover_vault),
    }
    .validate()
    .context("invalid configuration")?;
    config.trace_loaded();

    tracing::info!(command = "sync", "Starting synchronisation process");
    let mut store = connect_secret_store(config.discovery, &env)
        .await
        .map_err(JobError::from)?;
    let engine = RcloneEngine::from_env(&env).map_err(JobError::from)?;
    let pusher = PushGateway::new(config.push_gateway.clone());

    match synchronise(&config, &mut store, &engine, &pusher).await {
        Ok(report) => {
            tracing::info!(
                command = "sync",
                statistics = report.stats.len(),
                samples = report.samples.len(),
                "Synchronisation complete"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(command = "sync", error = %e, "Synchronisation failed");
            Err(e.into())
        }
    }
}
