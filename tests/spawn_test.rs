/*!
 * Spawn Engine Tests
 * Tests for executable resolution, redirect wiring and launch validation
 */

#![cfg(unix)]

use pretty_assertions::assert_eq;
use std::fs;
use std::time::Duration;
use subspawn::{Error, Exec, LaunchConfig, Process, Redirect};

#[tokio::test]
async fn test_spawn_resolves_via_path() {
    let process = Process::spawn(LaunchConfig::new(["true"]).unwrap()).unwrap();
    let code = process.wait().await.unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn test_spawn_missing_executable() {
    let config = LaunchConfig::new(["definitely-not-a-real-command-xyz"]).unwrap();
    let err = Process::spawn(config).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn test_spawn_bad_working_directory() {
    let mut builder = LaunchConfig::builder();
    builder.arg("true").current_dir("/definitely/not/a/dir");
    let err = Process::spawn(builder.build().unwrap()).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn test_working_directory_applies() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    let result = Exec::cmd("pwd")
        .current_dir(&canonical)
        .run()
        .await
        .unwrap();
    assert_eq!(result.output.trim(), canonical.to_str().unwrap());
}

#[tokio::test]
async fn test_env_override_replaces_entirely() {
    let result = Exec::cmd("env")
        .env_clear()
        .env("ONLY_VAR", "only-value")
        .run()
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    let lines: Vec<&str> = result.output.lines().collect();
    assert!(lines.contains(&"ONLY_VAR=only-value"));
    assert!(!lines.iter().any(|l| l.starts_with("PATH=")));
}

#[tokio::test]
async fn test_env_touch_keeps_parent_vars() {
    let result = Exec::cmd("sh")
        .args(["-c", "echo \"$SPAWN_TEST_EXTRA\""])
        .env("SPAWN_TEST_EXTRA", "added")
        .run()
        .await
        .unwrap();
    assert_eq!(result.output.trim(), "added");
}

#[tokio::test]
async fn test_stdout_to_file_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    fs::write(&path, "stale content that is longer than the output").unwrap();

    let result = Exec::cmd("sh")
        .args(["-c", "echo Hello World!"])
        .stdout(Redirect::WriteFile {
            path: path.clone(),
            append: false,
        })
        .run()
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    // stdout went to the file, not the captured result
    assert_eq!(result.output, "");
    assert_eq!(fs::read_to_string(&path).unwrap(), "Hello World!\n");
}

#[tokio::test]
async fn test_stdout_to_file_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.txt");
    fs::write(&path, "first\n").unwrap();

    Exec::cmd("sh")
        .args(["-c", "echo second"])
        .stdout(Redirect::WriteFile {
            path: path.clone(),
            append: true,
        })
        .run()
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
}

#[tokio::test]
async fn test_stdin_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.txt");
    fs::write(&path, "file input\n").unwrap();

    let result = Exec::cmd("cat")
        .stdin(Redirect::ReadFile(path))
        .run()
        .await
        .unwrap();
    assert_eq!(result.output, "file input\n");
}

#[tokio::test]
async fn test_stderr_merges_into_stdout() {
    let result = Exec::cmd("sh")
        .args(["-c", "echo out; echo err >&2"])
        .merge_stderr()
        .run()
        .await
        .unwrap();
    assert_eq!(result.output, "out\nerr\n");
    assert_eq!(result.errors, "");
}

#[tokio::test]
async fn test_stderr_merges_into_stdout_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("both.txt");

    Exec::cmd("sh")
        .args(["-c", "echo out; echo err >&2"])
        .stdout(Redirect::WriteFile {
            path: path.clone(),
            append: false,
        })
        .merge_stderr()
        .run()
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "out\nerr\n");
}

#[tokio::test]
async fn test_discarded_streams_stay_empty() {
    let result = Exec::cmd("sh")
        .args(["-c", "echo out; echo err >&2"])
        .stdout(Redirect::Discard)
        .stderr(Redirect::Discard)
        .run()
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "");
    assert_eq!(result.errors, "");
}

#[tokio::test]
async fn test_discarded_stdin_reads_eof() {
    let result = Exec::cmd("cat")
        .stdin(Redirect::Discard)
        .timeout(Duration::from_secs(10))
        .run()
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "");
}
