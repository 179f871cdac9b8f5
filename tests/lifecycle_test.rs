/*!
 * Process Lifecycle Tests
 * Tests for status queries, waits, timeouts and signal escalation
 */

#![cfg(unix)]

use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use subspawn::{Error, LaunchConfig, Process, Redirect};

fn sleeper(seconds: &str) -> Process {
    let mut builder = LaunchConfig::builder();
    builder
        .args(["sleep", seconds])
        .stdin(Redirect::Discard)
        .stdout(Redirect::Discard)
        .stderr(Redirect::Discard);
    Process::spawn(builder.build().unwrap()).unwrap()
}

#[tokio::test]
async fn test_exit_code_of_finished_process() {
    let mut builder = LaunchConfig::builder();
    builder
        .args(["sh", "-c", "exit 7"])
        .stdin(Redirect::Discard)
        .stdout(Redirect::Discard)
        .stderr(Redirect::Discard);
    let process = Process::spawn(builder.build().unwrap()).unwrap();
    let code = process.wait().await.unwrap();
    assert_eq!(code, 7);

    // cached transition, repeat queries agree
    assert_eq!(process.exit_code().unwrap(), Some(7));
    assert!(!process.is_alive().unwrap());
    assert_eq!(process.wait().await.unwrap(), 7);
}

#[tokio::test]
async fn test_running_process_reports_alive() {
    let process = sleeper("30");
    assert!(process.is_alive().unwrap());
    assert_eq!(process.exit_code().unwrap(), None);
    process.kill().unwrap();
    process.wait().await.unwrap();
}

#[tokio::test]
async fn test_wait_timeout_expires() {
    let process = sleeper("30");
    let started = Instant::now();
    let outcome = process.wait_timeout(Duration::from_millis(300)).await.unwrap();
    assert_eq!(outcome, None);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(process.is_alive().unwrap());
    process.kill().unwrap();
    process.wait().await.unwrap();
}

#[tokio::test]
async fn test_wait_timeout_returns_early_on_exit() {
    let process = sleeper("0");
    let outcome = process.wait_timeout(Duration::from_secs(30)).await.unwrap();
    assert_eq!(outcome, Some(0));
}

#[tokio::test]
async fn test_wait_timeout_rejects_zero() {
    let process = sleeper("30");
    let err = process.wait_timeout(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
    process.kill().unwrap();
    process.wait().await.unwrap();
}

#[tokio::test]
async fn test_terminate_stops_cooperative_child() {
    let process = sleeper("30");
    process.terminate().unwrap();
    let code = process.wait().await.unwrap();
    // exit code folds the signal number on unix
    assert_eq!(code, libc::SIGTERM);
}

#[tokio::test]
async fn test_kill_stops_child() {
    let process = sleeper("30");
    process.kill().unwrap();
    let code = process.wait().await.unwrap();
    assert_eq!(code, libc::SIGKILL);
}

#[tokio::test]
async fn test_signal_after_exit_is_noop() {
    let process = sleeper("0");
    process.wait().await.unwrap();
    // terminated state short-circuits, no signal reaches a reused pid
    process.terminate().unwrap();
    process.kill().unwrap();
}

#[tokio::test]
async fn test_send_custom_signal() {
    let process = sleeper("30");
    process.send_signal(nix::sys::signal::Signal::SIGINT).unwrap();
    let code = process.wait().await.unwrap();
    assert_eq!(code, libc::SIGINT);
}

#[tokio::test]
async fn test_drop_leaves_child_running() {
    let pid = {
        let process = sleeper("30");
        process.id()
    };
    // dropped Process never signals; the child must still be alive
    let alive = unsafe { libc::kill(pid as i32, 0) } == 0;
    assert!(alive);
    unsafe { libc::kill(pid as i32, libc::SIGKILL) };
    // reap so the sleeper doesn't linger as a zombie
    unsafe { libc::waitpid(pid as i32, std::ptr::null_mut(), 0) };
}
