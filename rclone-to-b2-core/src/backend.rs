//! B2 backend configuration and the filesystem handles handed to the sync engine.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::credential::Credential;
use crate::error::BackendError;

// These mirror the defaults of rclone's B2 backend, which are mandatory when
// the backend is configured without a config file.
pub const CHUNK_SIZE: &str = "96Mi";
pub const UPLOAD_CUTOFF: &str = "200Mi";
pub const UPLOAD_CONCURRENCY: &str = "4";
pub const COPY_CUTOFF: &str = "4Gi";
pub const DOWNLOAD_AUTH_DURATION: &str = "1w";

/// Options the B2 backend reads from its configuration.
pub const B2_OPTIONS: [&str; 8] = [
    "account",
    "key",
    "hard_delete",
    "chunk_size",
    "upload_cutoff",
    "upload_concurrency",
    "copy_cutoff",
    "download_auth_duration",
];

/// Key/value configuration surface consumed by a storage backend.
pub trait ConfigMapper {
    /// Value for `key`, or `None` when it is not set.
    fn get(&self, key: &str) -> Option<&str>;

    /// Part of the contract but unused by the backend.
    fn set(&mut self, key: &str, value: &str);
}

/// Immutable B2 configuration built from a [`Credential`].
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    values: BTreeMap<String, String>,
}

impl BackendConfig {
    pub fn from_credential(credential: &Credential) -> Self {
        let values = [
            ("chunk_size", CHUNK_SIZE),
            ("upload_cutoff", UPLOAD_CUTOFF),
            ("upload_concurrency", UPLOAD_CONCURRENCY),
            ("copy_cutoff", COPY_CUTOFF),
            ("download_auth_duration", DOWNLOAD_AUTH_DURATION),
            ("account", credential.account_id()),
            ("key", credential.key()),
            // Delete files for real instead of hiding them.
            ("hard_delete", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { values }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl ConfigMapper for BackendConfig {
    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Intentionally inert: the configuration never changes after construction.
    fn set(&mut self, _key: &str, _value: &str) {}
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: BTreeMap<&str, &str> = self
            .values
            .iter()
            .map(|(k, v)| match k.as_str() {
                "account" | "key" => (k.as_str(), "<redacted>"),
                _ => (k.as_str(), v.as_str()),
            })
            .collect();
        f.debug_struct("BackendConfig").field("values", &shown).finish()
    }
}

fn bucket_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]{6,63}$").expect("static regex"))
}

pub fn is_valid_bucket_name(bucket: &str) -> bool {
    bucket_pattern().is_match(bucket) && !bucket.to_ascii_lowercase().starts_with("b2-")
}

/// Destination handle: a bucket on the B2 backend plus the options that configure it.
#[derive(Clone)]
pub struct RemoteFs {
    bucket: String,
    path: Option<String>,
    options: Vec<(String, String)>,
}

impl RemoteFs {
    /// Binds `destination` to a B2 backend configured through `config`.
    ///
    /// `destination` is a bucket name, optionally followed by `/` and a path
    /// inside the bucket (`archive-bucket/host-1`). Only the bucket part is
    /// validated.
    pub fn b2(destination: &str, config: &dyn ConfigMapper) -> Result<Self, BackendError> {
        let (bucket, path) = match destination.split_once('/') {
            Some((bucket, path)) => (bucket, Some(path.trim_matches('/'))),
            None => (destination, None),
        };
        if !is_valid_bucket_name(bucket) {
            return Err(BackendError::InvalidBucket(destination.to_string()));
        }
        let path = path.filter(|p| !p.is_empty()).map(str::to_string);
        for required in ["account", "key"] {
            if config.get(required).map_or(true, str::is_empty) {
                return Err(BackendError::MissingOption(required));
            }
        }

        let options = B2_OPTIONS
            .iter()
            .filter_map(|name| {
                config
                    .get(name)
                    .map(|value| (format!("RCLONE_B2_{}", name.to_ascii_uppercase()), value.to_string()))
            })
            .collect::<Vec<_>>();
        info!(
            bucket,
            path = path.as_deref().unwrap_or(""),
            options = options.len(),
            "Created B2 filesystem handle"
        );
        Ok(Self {
            bucket: bucket.to_string(),
            path,
            options,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Path inside the bucket, if the destination named one.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Remote path understood by rclone, using an on-the-fly `b2` backend.
    pub fn remote_path(&self) -> String {
        match &self.path {
            Some(path) => format!(":b2:{}/{}", self.bucket, path),
            None => format!(":b2:{}", self.bucket),
        }
    }

    /// Backend options as environment variables for the engine process.
    pub fn env_options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for RemoteFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFs")
            .field("bucket", &self.bucket)
            .field("path", &self.path)
            .field(
                "options",
                &self.options.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Source handle: an existing local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: &Path) -> Result<Self, BackendError> {
        let invalid = |reason: String| BackendError::InvalidSource {
            path: root.to_path_buf(),
            reason,
        };
        let meta = std::fs::metadata(root).map_err(|e| invalid(e.to_string()))?;
        if !meta.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }
        debug!(path = %root.display(), "Created local filesystem handle");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
