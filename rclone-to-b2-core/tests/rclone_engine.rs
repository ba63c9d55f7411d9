#![cfg(unix)]

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::{tempdir, TempDir};

use rclone_to_b2_core::backend::BackendConfig;
use rclone_to_b2_core::config::Environment;
use rclone_to_b2_core::contract::SyncEngine;
use rclone_to_b2_core::credential::Credential;
use rclone_to_b2_core::error::{JobError, SyncError};
use rclone_to_b2_core::rclone::RcloneEngine;
use rclone_to_b2_core::synchronise::mirror;

const STATS_RECORD: &str = r#"{"level":"notice","msg":"\nTransferred: 12.500 MiB / 12.500 MiB, 100%\n","source":"accounting/stats.go:482","stats":{"bytes":13107200,"checks":120,"deletedDirs":0,"deletes":2,"elapsedTime":12.5,"errors":0,"renames":0,"speed":1048576,"totalBytes":13107200,"totalChecks":120,"totalTransfers":5,"transfers":5},"time":"2025-10-09T10:00:00.000000+00:00"}"#;

/// Writes an executable script standing in for rclone. It records its
/// arguments and selected environment variables next to itself, then runs
/// `body`.
fn write_script(dir: &Path, body: &str) -> PathBuf {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str("here=$(dirname \"$0\")\n");
    script.push_str("printf '%s\\n' \"$@\" > \"$here/args.txt\"\n");
    script.push_str(
        "printf '%s\\n' \"$RCLONE_B2_ACCOUNT\" \"$RCLONE_B2_HARD_DELETE\" \"$RCLONE_B2_CHUNK_SIZE\" \"$BACKUP_SETTING\" > \"$here/env.txt\"\n",
    );
    script.push_str(body);

    let path = dir.join("rclone");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fake_rclone(dir: &Path, stderr_lines: &[&str], exit_code: i32) -> PathBuf {
    let mut body = String::new();
    for line in stderr_lines {
        body.push_str(&format!("cat >&2 <<'LOG'\n{line}\nLOG\n"));
    }
    body.push_str(&format!("exit {exit_code}\n"));
    write_script(dir, &body)
}

fn backend_config() -> BackendConfig {
    BackendConfig::from_credential(&Credential::new("0012ab", "K001secret"))
}

fn environment() -> Environment {
    Environment::from_vars([("PATH", "/usr/bin:/bin")]).with_injected(BTreeMap::from([(
        "BACKUP_SETTING".to_string(),
        "from-env-file".to_string(),
    )]))
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

struct Fixture {
    bin_dir: TempDir,
    source: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            bin_dir: tempdir().unwrap(),
            source: tempdir().unwrap(),
        }
    }
}

#[tokio::test]
#[serial]
async fn successful_run_yields_last_statistics_once() {
    let fixture = Fixture::new();
    let binary = fake_rclone(
        fixture.bin_dir.path(),
        &[
            r#"{"level":"info","msg":"Copied (new)","object":"a.txt","time":"2025-10-09T10:00:00Z"}"#,
            r#"{"level":"notice","msg":"progress","stats":{"bytes":1}}"#,
            "2025/10/09 10:00:00 plain text line",
            STATS_RECORD,
        ],
        0,
    );
    let engine = RcloneEngine::new(&binary, &environment()).unwrap();

    let stats = mirror(&engine, fixture.source.path(), &backend_config(), "archive-bucket")
        .await
        .expect("mirror should succeed");
    assert_eq!(stats.counter("bytes").unwrap(), 13_107_200);
    assert_eq!(stats.rate("elapsedTime").unwrap(), 12.5);
    assert!(engine.take_stats().is_none(), "statistics are handed out once");

    let args = read_lines(&fixture.bin_dir.path().join("args.txt"));
    assert_eq!(args[0], "sync");
    assert_eq!(args[1], fixture.source.path().to_string_lossy());
    assert_eq!(args[2], ":b2:archive-bucket");
    assert!(args.iter().any(|a| a == "--delete-during"));
    assert!(!args.iter().any(|a| a == "--dry-run"));

    let env = read_lines(&fixture.bin_dir.path().join("env.txt"));
    assert_eq!(env, ["0012ab", "true", "96Mi", "from-env-file"]);
}

#[tokio::test]
#[serial]
async fn nonzero_exit_reports_code_and_last_error() {
    let fixture = Fixture::new();
    let binary = fake_rclone(
        fixture.bin_dir.path(),
        &[
            r#"{"level":"error","msg":"Failed to copy: 401 bad_auth_token","object":"a.txt"}"#,
            r#"{"level":"error","msg":"Attempt 1/3 failed with 1 errors"}"#,
        ],
        7,
    );
    let engine = RcloneEngine::new(&binary, &environment()).unwrap();

    let err = mirror(&engine, fixture.source.path(), &backend_config(), "archive-bucket")
        .await
        .unwrap_err();
    match &err {
        SyncError::Exit {
            code,
            meaning,
            detail,
        } => {
            assert_eq!(*code, 7);
            assert_eq!(*meaning, "fatal error");
            assert_eq!(detail, "Attempt 1/3 failed with 1 errors");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(engine.take_stats().is_none());
    assert!(JobError::from(err).to_string().starts_with("error during sync"));
}

#[tokio::test]
#[serial]
async fn success_without_statistics_is_reported() {
    let fixture = Fixture::new();
    let binary = fake_rclone(
        fixture.bin_dir.path(),
        &[r#"{"level":"info","msg":"There was nothing to transfer"}"#],
        0,
    );
    let engine = RcloneEngine::new(&binary, &environment()).unwrap();

    assert!(matches!(
        mirror(&engine, fixture.source.path(), &backend_config(), "archive-bucket").await,
        Err(SyncError::StatsUnavailable)
    ));
}

#[tokio::test]
#[serial]
async fn dry_run_is_forwarded() {
    let fixture = Fixture::new();
    let binary = fake_rclone(fixture.bin_dir.path(), &[STATS_RECORD], 0);
    let engine = RcloneEngine::new(&binary, &environment()).unwrap();

    let config = backend_config();
    let dst = rclone_to_b2_core::backend::RemoteFs::b2("archive-bucket", &config).unwrap();
    let src = rclone_to_b2_core::backend::LocalFs::new(fixture.source.path()).unwrap();
    engine.sync(&dst, &src, true).await.unwrap();

    let args = read_lines(&fixture.bin_dir.path().join("args.txt"));
    assert_eq!(args.last().map(String::as_str), Some("--dry-run"));
    assert!(engine.take_stats().is_some());
}

#[tokio::test]
#[serial]
async fn invalid_utf8_output_does_not_interrupt_the_sync() {
    let fixture = Fixture::new();
    let body = format!(
        "printf 'warning \\377\\376 bad name\\n' >&2\n\
         sleep 1\n\
         cat >&2 <<'LOG'\n{STATS_RECORD}\nLOG\n\
         touch \"$here/finished\"\n\
         exit 0\n"
    );
    let binary = write_script(fixture.bin_dir.path(), &body);
    let engine = RcloneEngine::new(&binary, &environment()).unwrap();

    let stats = mirror(&engine, fixture.source.path(), &backend_config(), "archive-bucket")
        .await
        .expect("undecodable output is relayed, not fatal");
    assert_eq!(stats.counter("deletes").unwrap(), 2);
    assert!(
        fixture.bin_dir.path().join("finished").exists(),
        "rclone must run to completion"
    );
}

#[tokio::test]
#[serial]
async fn prefixed_destination_is_passed_to_rclone() {
    let fixture = Fixture::new();
    let binary = fake_rclone(fixture.bin_dir.path(), &[STATS_RECORD], 0);
    let engine = RcloneEngine::new(&binary, &environment()).unwrap();

    mirror(
        &engine,
        fixture.source.path(),
        &backend_config(),
        "archive-bucket/host-1",
    )
    .await
    .expect("mirror should succeed");

    let args = read_lines(&fixture.bin_dir.path().join("args.txt"));
    assert_eq!(args[2], ":b2:archive-bucket/host-1");
}
