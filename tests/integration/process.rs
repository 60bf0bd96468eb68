//! Tests running the real binary
//!
//! The beat is started as a child process, readiness is detected through its
//! log file and it is stopped with SIGTERM like a service manager would.

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde_json::json;

const READY_MARKER: &str = "is running";

fn spawn_beat(config: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_cloudwatchmetricbeat"))
        .arg("-c")
        .arg(config)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn the beat")
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("beat did not exit within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn wait_for_log(log_file: &Path, needle: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if std::fs::read_to_string(log_file).is_ok_and(|log| log.contains(needle)) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

fn write_config(dir: &Path, config: serde_json::Value) -> std::path::PathBuf {
    let path = dir.join("cloudwatchmetricbeat.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
    path
}

#[test]
fn test_sigterm_after_readiness_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("metrics.jsonl");
    let config = write_config(
        dir.path(),
        json!({
            "period": 1,
            "system_metrics": true,
            "output": {"type": "file", "path": output},
            "logging": {"path": dir.path().join("log").join("*"), "level": "info"}
        }),
    );
    let log_file = dir.path().join("log").join("cloudwatchmetricbeat");

    let mut child = spawn_beat(&config);
    assert!(
        wait_for_log(&log_file, READY_MARKER, Duration::from_secs(10)),
        "readiness line never appeared"
    );

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();
    let status = wait_for_exit(&mut child, Duration::from_secs(20));

    assert_eq!(status.code(), Some(0));
    let log = std::fs::read_to_string(&log_file).unwrap();
    assert_eq!(log.matches(READY_MARKER).count(), 1);
}

#[test]
fn test_repeated_sigterm_runs_one_drain() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("metrics.jsonl");
    let config = write_config(
        dir.path(),
        json!({
            "period": 1,
            "system_metrics": true,
            "output": {"type": "file", "path": output},
            "logging": {"path": dir.path().join("beat.log"), "level": "info"}
        }),
    );
    let log_file = dir.path().join("beat.log");

    let mut child = spawn_beat(&config);
    assert!(
        wait_for_log(&log_file, READY_MARKER, Duration::from_secs(10)),
        "readiness line never appeared"
    );

    let pid = Pid::from_raw(child.id() as i32);
    kill(pid, Signal::SIGTERM).unwrap();
    kill(pid, Signal::SIGTERM).unwrap();
    std::thread::sleep(Duration::from_millis(10));
    // The process may already be gone by now
    let _ = kill(pid, Signal::SIGTERM);
    let status = wait_for_exit(&mut child, Duration::from_secs(20));

    assert_eq!(status.code(), Some(0));
    let log = std::fs::read_to_string(&log_file).unwrap();
    assert_eq!(log.matches("stopping cloudwatchmetricbeat").count(), 1);
    assert_eq!(log.matches("received SIGTERM, stopping").count(), 1);
    assert_eq!(log.matches("exiting with code 0").count(), 1);
}

#[test]
fn test_one_shot_run_exits_on_its_own() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("metrics.jsonl");
    let config = write_config(
        dir.path(),
        json!({
            "period": 0,
            "system_metrics": true,
            "output": {"type": "file", "path": output}
        }),
    );

    let mut child = spawn_beat(&config);
    let status = wait_for_exit(&mut child, Duration::from_secs(20));

    assert_eq!(status.code(), Some(0));
    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("system.memory.total"));
}

#[test]
fn test_invalid_config_exits_before_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        json!({
            "shipper": {"on_failure": "spill"},
            "logging": {"path": dir.path().join("beat.log")}
        }),
    );

    let mut child = spawn_beat(&config);
    let status = wait_for_exit(&mut child, Duration::from_secs(10));

    assert_ne!(status.code(), Some(0));
    let log = std::fs::read_to_string(dir.path().join("beat.log")).unwrap_or_default();
    assert!(!log.contains(READY_MARKER));
    assert!(log.contains("spill_dir"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    let mut child = spawn_beat(&dir.path().join("missing.json"));
    let status = wait_for_exit(&mut child, Duration::from_secs(10));

    assert_ne!(status.code(), Some(0));
}
