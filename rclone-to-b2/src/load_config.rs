/// `load_config` module: the environment bootstrap file.
///
/// The bootstrap file is a flat JSON object of string keys to string values,
/// read before anything else runs. Its entries are layered over the process
/// environment and win over variables of the same name.
///
/// # Behaviour
/// - An absent file, or an empty path, is not an error: nothing is injected.
/// - Any other read error, malformed JSON, or a non-string value is fatal and
///   nothing is injected.
///
/// # Errors
/// Failures are [`ConfigError`] values wrapped in `anyhow::Error`, so callers
/// can still downcast them.
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Result;
use rclone_to_b2_core::config::Environment;
use rclone_to_b2_core::error::ConfigError;
use tracing::{error, info};

/// Loads the bootstrap file at `path` over the current process environment.
pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<Environment> {
    load_env_file_over(path, Environment::from_process())
}

/// Loads the bootstrap file at `path` over `base`.
pub fn load_env_file_over<P: AsRef<Path>>(path: P, base: Environment) -> Result<Environment> {
    let path_ref = path.as_ref();
    if path_ref.as_os_str().is_empty() {
        info!("Environment file disabled");
        return Ok(base);
    }

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(env_file = ?path_ref, "Environment file not found, skipping");
            return Ok(base);
        }
        Err(e) => {
            error!(error = ?e, env_file = ?path_ref, "Failed to read environment file");
            return Err(ConfigError::EnvFileIo {
                path: path_ref.to_path_buf(),
                source: e,
            }
            .into());
        }
    };

    let entries: BTreeMap<String, String> = match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, env_file = ?path_ref, "Failed to parse environment file");
            return Err(ConfigError::EnvFileParse {
                path: path_ref.to_path_buf(),
                source: e,
            }
            .into());
        }
    };

    info!(
        env_file = ?path_ref,
        variables = ?entries.keys().collect::<Vec<_>>(),
        "Loaded environment file"
    );
    Ok(base.with_injected(entries))
}
