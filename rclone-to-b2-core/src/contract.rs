//! # contract: seams between the job pipeline and its external collaborators
//!
//! The pipeline never talks to Vault, rclone or the Pushgateway directly. It
//! goes through the three traits in this module, which keeps the orchestration
//! testable with `mockall` mocks and lets the binary wire in the real clients.
//!
//! - [`SecretStore`]: authenticate, then fetch a structured secret.
//! - [`SyncEngine`]: run one sync from a local source to a remote destination
//!   and hand out the final statistics.
//! - [`MetricsPusher`]: deliver a gathered set of metric families in one push.
//!
//! Mocks are generated for tests and, with the `test-export-mocks` feature,
//! exported for downstream crates.

use async_trait::async_trait;
use mockall::automock;

use crate::backend::{LocalFs, RemoteFs};
use crate::error::{CredentialError, PushError, SyncError};
use crate::stats::RunStatistics;

/// A secret store that must be authenticated against before secrets can be read.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Establish an authenticated session. Must succeed before [`SecretStore::fetch`].
    async fn authenticate(&mut self) -> Result<(), CredentialError>;

    /// Read the secret stored at `path`, returning its key/value payload.
    async fn fetch(&self, path: &str) -> Result<serde_json::Value, CredentialError>;
}

/// An external engine that performs directional file synchronisation.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// Make `dst` match `src`, removing from `dst` whatever `src` lacks.
    ///
    /// Blocks until the engine finishes. With `dry_run` the engine only reports.
    async fn sync(&self, dst: &RemoteFs, src: &LocalFs, dry_run: bool) -> Result<(), SyncError>;

    /// Statistics of the last successful sync. Yields them once, then `None`.
    fn take_stats(&self) -> Option<RunStatistics>;
}

/// Delivers gathered metric families to a push-based metrics backend.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MetricsPusher: Send + Sync {
    /// Replace all metrics grouped under `job` with `families`, atomically.
    async fn push(
        &self,
        job: &str,
        families: Vec<prometheus::proto::MetricFamily>,
    ) -> Result<(), PushError>;
}
