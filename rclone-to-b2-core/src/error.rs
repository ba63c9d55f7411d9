//! Error types for every stage of the mirror job.
//!
//! Each pipeline stage has its own enum so callers can tell a credential
//! failure from a sync failure without string matching. [`JobError`] wraps
//! the stages that run after configuration has been validated.

use std::path::PathBuf;

use thiserror::Error;

/// Problems with the job configuration or the environment bootstrap file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read environment file {path}: {source}")]
    EnvFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse environment file {path}: {source}")]
    EnvFileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("required setting `{0}` is empty")]
    MissingSetting(&'static str),

    #[error("invalid pushgateway URL `{url}`: {reason}")]
    InvalidGatewayUrl { url: String, reason: String },
}

/// Failures while discovering, authenticating to or reading from the secret store.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("secret store discovery failed: {0}")]
    Discovery(String),

    #[error("invalid secret store address `{0}`")]
    InvalidAddress(String),

    #[error("secret store authentication failed: {0}")]
    Authentication(String),

    #[error("no secret store authentication method available (set VAULT_TOKEN or VAULT_ROLE_ID/VAULT_SECRET_ID)")]
    NoAuthMethod,

    #[error("secret store request to {path} failed: {reason}")]
    Request { path: String, reason: String },

    #[error("secret not found at {0}")]
    NotFound(String),

    #[error("secret at {path} could not be decoded: {reason}")]
    Decode { path: String, reason: String },
}

/// Failures while building the source or destination filesystem handles.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("invalid bucket name `{0}`")]
    InvalidBucket(String),

    #[error("backend option `{0}` is missing or empty")]
    MissingOption(&'static str),

    #[error("source directory {path} is not usable: {reason}")]
    InvalidSource { path: PathBuf, reason: String },
}

/// Failures of the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to prepare sync engine: {0}")]
    Setup(#[source] std::io::Error),

    #[error("failed to launch sync engine `{binary}`: {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read sync engine output: {0}")]
    LogStream(#[source] std::io::Error),

    #[error("sync engine exited with code {code} ({meaning}): {detail}")]
    Exit {
        code: i32,
        meaning: &'static str,
        detail: String,
    },

    #[error("sync engine was terminated by a signal: {0}")]
    Terminated(String),

    #[error("sync engine did not report final statistics")]
    StatsUnavailable,
}

/// Failures while turning run statistics into metric samples.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("run statistic `{0}` is missing")]
    MissingStat(&'static str),

    #[error("run statistic `{key}` has the wrong type: expected {expected}, got {found}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("run statistics are not a JSON object")]
    NotAnObject,

    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

/// Failures while delivering samples to the Pushgateway.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),

    #[error("invalid pushgateway URL `{0}`")]
    InvalidUrl(String),

    #[error("pushgateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("pushgateway rejected push with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Any failure of the job after its configuration was accepted.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("error fetching B2 config: {0}")]
    Credential(#[from] CredentialError),

    #[error("error creating B2 FS: {0}")]
    Backend(#[from] BackendError),

    #[error("error during sync: {0}")]
    Sync(SyncError),

    #[error("error gathering metrics: {0}")]
    Metrics(#[from] MetricsError),

    #[error("error pushing metrics: {0}")]
    Push(#[from] PushError),
}

impl From<SyncError> for JobError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Backend(b) => JobError::Backend(b),
            other => JobError::Sync(other),
        }
    }
}
