//! High-level pipeline: credential → backend config → sync → metrics push.
//!
//! This module holds the orchestration of one mirror run:
//!   - Resolves the B2 credential through a [`SecretStore`]
//!   - Builds the immutable [`BackendConfig`] from it
//!   - Mirrors the source directory into the bucket with a [`SyncEngine`]
//!   - Maps the engine's final statistics to metrics and pushes them once
//!
//! # Responsibilities
//! - Strictly sequential, fail-fast orchestration: the first failing step ends the run
//! - No metrics are pushed unless the sync succeeded and every statistic converted
//! - Logs each step through `tracing`; credential values never appear in logs
//!
//! # Navigation
//! - Full run: [`synchronise`]
//! - Sync step alone: [`mirror`]
//! - Output: [`SynchroniseReport`]

use std::path::Path;

use tracing::{error, info};

use crate::backend::{BackendConfig, LocalFs, RemoteFs};
use crate::config::JobConfig;
use crate::contract::{MetricsPusher, SecretStore, SyncEngine};
use crate::credential::resolve_credential;
use crate::error::{JobError, SyncError};
use crate::metrics::{MetricSample, RunStatsCollector};
use crate::stats::RunStatistics;

/// Outcome of a successful run.
#[derive(Debug)]
pub struct SynchroniseReport {
    pub stats: RunStatistics,
    pub samples: Vec<MetricSample>,
}

/// Mirrors `source_dir` into `bucket` and returns the engine's final statistics.
///
/// The destination is built before the source, and both before the engine
/// runs. Deletions are propagated and the run is never a dry run.
pub async fn mirror<E>(
    engine: &E,
    source_dir: &Path,
    config: &BackendConfig,
    bucket: &str,
) -> Result<RunStatistics, SyncError>
where
    E: SyncEngine + ?Sized,
{
    let dst = RemoteFs::b2(bucket, config)?;
    let src = LocalFs::new(source_dir)?;

    engine.sync(&dst, &src, false).await?;
    engine.take_stats().ok_or(SyncError::StatsUnavailable)
}

/// Runs the whole job against the given collaborators.
pub async fn synchronise<S, E, P>(
    config: &JobConfig,
    store: &mut S,
    engine: &E,
    pusher: &P,
) -> Result<SynchroniseReport, JobError>
where
    S: SecretStore + ?Sized,
    E: SyncEngine + ?Sized,
    P: MetricsPusher + ?Sized,
{
    info!("[SYNC] Resolving B2 credential");
    let credential = resolve_credential(store, &config.vault_material).await?;
    let backend_config = BackendConfig::from_credential(&credential);
    drop(credential);

    info!(
        source = %config.source_dir.display(),
        bucket = %config.bucket,
        "[SYNC] Mirroring source directory"
    );
    let stats = match mirror(engine, &config.source_dir, &backend_config, &config.bucket).await {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "[SYNC][ERROR] Sync failed");
            return Err(e.into());
        }
    };
    info!(statistics = stats.len(), "[SYNC] Sync complete");

    let collector = RunStatsCollector::new(&config.instance, &stats).map_err(|e| {
        error!(error = %e, "[SYNC][ERROR] Failed to gather metrics");
        e
    })?;
    let samples = collector.samples().to_vec();
    let registry = collector.into_registry()?;

    pusher
        .push(&config.job, registry.gather())
        .await
        .map_err(|e| {
            error!(error = %e, "[SYNC][ERROR] Failed to push metrics");
            e
        })?;
    info!(
        job = %config.job,
        instance = %config.instance,
        samples = samples.len(),
        "[SYNC] Metrics pushed"
    );

    Ok(SynchroniseReport { stats, samples })
}
