use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use reqwest::Url;
use tracing::{debug, info};

use crate::credential::DiscoveryMode;
use crate::error::ConfigError;

/// Name of the variable holding the source directory when none is given on the command line.
pub const SOURCE_DIR_VAR: &str = "RCLONE_TO_B2_FROM";

/// Read-only view of the process environment with the bootstrap file layered on top.
///
/// Entries loaded from the bootstrap file win over process variables of the
/// same name. The process environment itself is never written; the injected
/// entries are handed to child processes explicitly instead.
#[derive(Clone, Default)]
pub struct Environment {
    process: HashMap<String, String>,
    injected: BTreeMap<String, String>,
}

impl Environment {
    /// Snapshot of the current process environment with nothing injected.
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }))
    }

    /// Builds an environment from explicit variables, mainly for tests.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            process: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            injected: BTreeMap::new(),
        }
    }

    /// Layers `entries` over this environment, overwriting existing names.
    pub fn with_injected(mut self, entries: BTreeMap<String, String>) -> Self {
        self.injected.extend(entries);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.injected
            .get(key)
            .or_else(|| self.process.get(key))
            .map(String::as_str)
    }

    /// Like [`Environment::get`], but treats empty values as unset.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Entries that came from the bootstrap file.
    pub fn injected(&self) -> impl Iterator<Item = (&str, &str)> {
        self.injected.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn injected_len(&self) -> usize {
        self.injected.len()
    }
}

// Values may hold tokens, so only names are shown.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("process_vars", &self.process.len())
            .field("injected", &self.injected.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Unvalidated job settings as collected from flags and the environment.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub source_dir: PathBuf,
    pub vault_material: String,
    pub bucket: String,
    pub instance: String,
    pub push_gateway: String,
    pub job: String,
    pub discovery: DiscoveryMode,
}

impl JobSettings {
    pub fn validate(self) -> Result<JobConfig, ConfigError> {
        let required = [
            ("vault-material", &self.vault_material),
            ("b2-bucket", &self.bucket),
            ("instance", &self.instance),
            ("pushgateway", &self.push_gateway),
            ("job", &self.job),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::MissingSetting(*name));
        }

        let push_gateway =
            Url::parse(&self.push_gateway).map_err(|e| ConfigError::InvalidGatewayUrl {
                url: self.push_gateway.clone(),
                reason: e.to_string(),
            })?;
        if !matches!(push_gateway.scheme(), "http" | "https") || push_gateway.cannot_be_a_base() {
            return Err(ConfigError::InvalidGatewayUrl {
                url: self.push_gateway,
                reason: "expected an http(s) URL".to_string(),
            });
        }

        Ok(JobConfig {
            source_dir: self.source_dir,
            vault_material: self.vault_material,
            bucket: self.bucket,
            instance: self.instance,
            push_gateway,
            job: self.job,
            discovery: self.discovery,
        })
    }
}

/// Validated configuration for one mirror run.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub source_dir: PathBuf,
    /// Vault path of the secret holding the B2 credential.
    pub vault_material: String,
    pub bucket: String,
    /// Value of the `instance` label on every pushed sample.
    pub instance: String,
    pub push_gateway: Url,
    pub job: String,
    pub discovery: DiscoveryMode,
}

impl JobConfig {
    pub fn trace_loaded(&self) {
        info!(
            source_dir = %self.source_dir.display(),
            bucket = %self.bucket,
            instance = %self.instance,
            push_gateway = %self.push_gateway,
            job = %self.job,
            discovery = ?self.discovery,
            "Loaded JobConfig"
        );
        debug!(?self, "JobConfig loaded (full debug)");
    }
}
