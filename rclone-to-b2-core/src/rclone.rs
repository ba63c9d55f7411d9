//! Drives the `rclone` executable as the sync engine.
//!
//! The B2 backend is configured on the fly through `RCLONE_B2_*` variables on
//! the child process, so no rclone config file with secrets is ever written.
//! rclone logs JSON to stderr; those records are relayed to `tracing` and the
//! last one carrying a `stats` object becomes the run's [`RunStatistics`].
//!
//! Scratch space (config, temp and cache directories) lives in a [`TempDir`]
//! owned by the engine and is removed when the engine is dropped, whichever
//! way the job ends.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::backend::{LocalFs, RemoteFs};
use crate::config::Environment;
use crate::contract::SyncEngine;
use crate::error::SyncError;
use crate::stats::RunStatistics;

pub const DEFAULT_RCLONE_BINARY: &str = "rclone";
/// Variable that overrides the rclone executable.
pub const RCLONE_BINARY_VAR: &str = "RCLONE_TO_B2_RCLONE";

/// Meaning of rclone's documented exit codes.
pub fn exit_code_meaning(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "syntax or usage error",
        2 => "uncategorized error",
        3 => "directory not found",
        4 => "file not found",
        5 => "temporary error",
        6 => "less serious errors",
        7 => "fatal error",
        8 => "transfer exceeded",
        9 => "no files transferred",
        _ => "unknown error",
    }
}

pub struct RcloneEngine {
    binary: PathBuf,
    injected_env: Vec<(String, String)>,
    workdir: TempDir,
    stats: Mutex<Option<RunStatistics>>,
}

impl std::fmt::Debug for RcloneEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcloneEngine")
            .field("binary", &self.binary)
            .field("workdir", &self.workdir.path())
            .finish()
    }
}

impl RcloneEngine {
    /// Engine running `binary`, exporting the bootstrap entries of `env` to it.
    pub fn new(binary: impl Into<PathBuf>, env: &Environment) -> Result<Self, SyncError> {
        let workdir = tempfile::Builder::new()
            .prefix("rclone-to-b2-")
            .tempdir()
            .map_err(SyncError::Setup)?;
        for dir in ["tmp", "cache"] {
            std::fs::create_dir(workdir.path().join(dir)).map_err(SyncError::Setup)?;
        }
        std::fs::write(workdir.path().join("rclone.conf"), b"").map_err(SyncError::Setup)?;

        let binary = binary.into();
        debug!(binary = %binary.display(), workdir = %workdir.path().display(), "Prepared rclone engine");
        Ok(Self {
            binary,
            injected_env: env
                .injected()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            workdir,
            stats: Mutex::new(None),
        })
    }

    /// Engine using [`RCLONE_BINARY_VAR`] or `rclone` from `PATH`.
    pub fn from_env(env: &Environment) -> Result<Self, SyncError> {
        let binary = env
            .get_non_empty(RCLONE_BINARY_VAR)
            .unwrap_or(DEFAULT_RCLONE_BINARY)
            .to_string();
        Self::new(binary, env)
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Command line for one `rclone sync` run.
    pub fn sync_args(&self, dst: &RemoteFs, src: &LocalFs, dry_run: bool) -> Vec<OsString> {
        let work = self.workdir.path();
        let mut args: Vec<OsString> = vec![
            "sync".into(),
            src.root().as_os_str().to_owned(),
            dst.remote_path().into(),
            "--fast-list".into(),
            "--delete-during".into(),
            "--use-mmap".into(),
            "--log-level".into(),
            "INFO".into(),
            "--use-json-log".into(),
            "--stats".into(),
            "1m".into(),
            "--stats-log-level".into(),
            "NOTICE".into(),
            "--config".into(),
            work.join("rclone.conf").into_os_string(),
            "--temp-dir".into(),
            work.join("tmp").into_os_string(),
            "--cache-dir".into(),
            work.join("cache").into_os_string(),
        ];
        if dry_run {
            args.push("--dry-run".into());
        }
        args
    }

    fn store_stats(&self, stats: Option<RunStatistics>) {
        if let Ok(mut slot) = self.stats.lock() {
            *slot = stats;
        }
    }
}

/// Re-emits one rclone log record and returns its message when it is an error.
fn relay_log_line(line: &str) -> Option<String> {
    let record: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            if !line.trim().is_empty() {
                info!(target: "rclone", "{}", line.trim());
            }
            return None;
        }
    };
    let msg = record
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim();
    let object = record.get("object").and_then(Value::as_str).unwrap_or("");
    match record.get("level").and_then(Value::as_str).unwrap_or("info") {
        "debug" => debug!(target: "rclone", object, "{msg}"),
        "info" | "notice" => info!(target: "rclone", object, "{msg}"),
        "warning" => warn!(target: "rclone", object, "{msg}"),
        _ => {
            error!(target: "rclone", object, "{msg}");
            return Some(if object.is_empty() {
                msg.to_string()
            } else {
                format!("{object}: {msg}")
            });
        }
    }
    None
}

#[async_trait]
impl SyncEngine for RcloneEngine {
    async fn sync(&self, dst: &RemoteFs, src: &LocalFs, dry_run: bool) -> Result<(), SyncError> {
        self.store_stats(None);
        let args = self.sync_args(dst, src, dry_run);
        info!(
            source = %src.root().display(),
            destination = %dst.remote_path(),
            dry_run,
            "Starting rclone sync"
        );

        let mut child = Command::new(&self.binary)
            .args(&args)
            .envs(self.injected_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(dst.env_options())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SyncError::Launch {
                binary: self.binary.clone(),
                source: e,
            })?;

        let mut last_stats = None;
        let mut last_error = None;
        if let Some(stderr) = child.stderr.take() {
            // Raw bytes: file names and panics are not guaranteed to be UTF-8.
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let read = reader
                    .read_until(b'\n', &mut buf)
                    .await
                    .map_err(SyncError::LogStream)?;
                if read == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(&['\r', '\n'][..]);
                if let Some(stats) = RunStatistics::from_log_line(line) {
                    last_stats = Some(stats);
                }
                if let Some(message) = relay_log_line(line) {
                    last_error = Some(message);
                }
            }
        }

        let status = child.wait().await.map_err(SyncError::Setup)?;
        match status.code() {
            Some(0) => {
                info!(has_stats = last_stats.is_some(), "rclone sync finished");
                self.store_stats(last_stats);
                Ok(())
            }
            Some(code) => {
                let meaning = exit_code_meaning(code);
                error!(code, meaning, "rclone sync failed");
                Err(SyncError::Exit {
                    code,
                    meaning,
                    detail: last_error.unwrap_or_else(|| "no error reported".to_string()),
                })
            }
            None => Err(SyncError::Terminated(status.to_string())),
        }
    }

    fn take_stats(&self) -> Option<RunStatistics> {
        self.stats.lock().ok()?.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendConfig;
    use crate::credential::Credential;
    use std::collections::BTreeMap;

    fn handles(dir: &Path) -> (RemoteFs, LocalFs) {
        let config = BackendConfig::from_credential(&Credential::new("0012ab", "K001secret"));
        (
            RemoteFs::b2("archive-bucket", &config).unwrap(),
            LocalFs::new(dir).unwrap(),
        )
    }

    #[test]
    fn sync_args_enable_delete_during_and_fast_list() {
        let src_dir = tempfile::tempdir().unwrap();
        let engine = RcloneEngine::new("rclone", &Environment::default()).unwrap();
        let (dst, src) = handles(src_dir.path());

        let args: Vec<String> = engine
            .sync_args(&dst, &src, false)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "sync");
        assert_eq!(args[1], src_dir.path().to_string_lossy());
        assert_eq!(args[2], ":b2:archive-bucket");
        for flag in ["--fast-list", "--delete-during", "--use-mmap", "--use-json-log"] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert!(!args.iter().any(|a| a == "--dry-run"));
        assert!(!args.iter().any(|a| a.contains("K001secret")));

        let dry: Vec<OsString> = engine.sync_args(&dst, &src, true);
        assert_eq!(dry.last().unwrap(), "--dry-run");
    }

    #[test]
    fn workdir_is_removed_on_drop() {
        let engine = RcloneEngine::new("rclone", &Environment::default()).unwrap();
        let workdir = engine.workdir().to_path_buf();
        assert!(workdir.join("rclone.conf").exists());
        drop(engine);
        assert!(!workdir.exists());
    }

    #[test]
    fn binary_override_comes_from_environment() {
        let env = Environment::default().with_injected(BTreeMap::from([(
            RCLONE_BINARY_VAR.to_string(),
            "/opt/rclone/bin/rclone".to_string(),
        )]));
        let engine = RcloneEngine::from_env(&env).unwrap();
        assert_eq!(engine.binary, PathBuf::from("/opt/rclone/bin/rclone"));
        assert_eq!(engine.injected_env.len(), 1);
    }

    #[test]
    fn exit_codes_are_described() {
        assert_eq!(exit_code_meaning(3), "directory not found");
        assert_eq!(exit_code_meaning(7), "fatal error");
        assert_eq!(exit_code_meaning(42), "unknown error");
    }

    #[test]
    fn error_records_are_reported() {
        assert_eq!(
            relay_log_line(r#"{"level":"error","msg":"Failed to copy: 401 unauthorized","object":"a.txt"}"#),
            Some("a.txt: Failed to copy: 401 unauthorized".to_string())
        );
        assert_eq!(relay_log_line(r#"{"level":"info","msg":"Copied (new)"}"#), None);
        assert_eq!(relay_log_line("plain text"), None);
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let src_dir = tempfile::tempdir().unwrap();
        let engine =
            RcloneEngine::new("/nonexistent/rclone-binary", &Environment::default()).unwrap();
        let (dst, src) = handles(src_dir.path());
        assert!(matches!(
            engine.sync(&dst, &src, false).await,
            Err(SyncError::Launch { .. })
        ));
        assert!(engine.take_stats().is_none());
    }
}
