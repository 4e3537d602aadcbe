#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use shardlink_peer::Identity;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "shardlink-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// Start a listener whose engine appends "<shard> <block>" to `log`.
fn spawn_listener(log: &Path) -> (Child, String) {
    spawn_listener_with(&format!("echo \"$1 $2\" >> '{}'", log.display()), &[])
}

/// Start a listener whose engine is `sh -c <script> engine <shard> <block>`.
fn spawn_listener_with(script: &str, extra: &[&str]) -> (Child, String) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_shardlink"))
        .args(["--log-level", "error", "--engine-cmd", "/bin/sh"])
        .arg("--engine-arg=-c")
        .arg("--engine-arg")
        .arg(script)
        .args(["--engine-arg", "engine"])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listener should start");

    let stdout = child.stdout.take().expect("stdout is piped");
    let mut first = String::new();
    BufReader::new(stdout)
        .read_line(&mut first)
        .expect("listener should print its address");
    (child, first.trim().to_string())
}

fn wait_for_lines(path: &Path, expected: usize, timeout: Duration) -> Vec<String> {
    let start = Instant::now();
    loop {
        let lines: Vec<String> = std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect();
        if lines.len() >= expected || start.elapsed() >= timeout {
            return lines;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn dial_streams_blocks_to_listener_engine() {
    let dir = unique_temp_dir("e2e");
    let log = dir.join("engine.log");
    let (mut listener, dest) = spawn_listener(&log);
    assert!(dest.starts_with("/ip4/127.0.0.1/tcp/"), "{dest}");
    assert!(dest.contains("/p2p/"), "{dest}");

    let output = Command::new(env!("CARGO_BIN_EXE_shardlink"))
        .args(["--log-level", "error", "-d", &dest])
        .args(["--shard", "7", "--start-block", "100", "--count", "3"])
        .output()
        .expect("dialer should run");
    assert!(
        output.status.success(),
        "dialer failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let lines = wait_for_lines(&log, 3, Duration::from_secs(5));
    assert_eq!(lines, vec!["7 100", "7 101", "7 102"]);

    let _ = listener.kill();
    let _ = listener.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn interrupt_stops_listener_with_hung_engine_within_grace() {
    let dir = unique_temp_dir("grace");
    let log = dir.join("engine.log");
    let script = format!("echo started >> '{}'; exec sleep 20", log.display());
    let (mut listener, dest) = spawn_listener_with(&script, &["--shutdown-grace", "1s"]);

    let output = Command::new(env!("CARGO_BIN_EXE_shardlink"))
        .args(["--log-level", "error", "-d", &dest, "--count", "1"])
        .output()
        .expect("dialer should run");
    assert!(output.status.success());
    assert_eq!(wait_for_lines(&log, 1, Duration::from_secs(5)).len(), 1);

    let interrupted = Command::new("kill")
        .args(["-INT", &listener.id().to_string()])
        .status()
        .expect("kill should run");
    assert!(interrupted.success());

    let start = Instant::now();
    let status = loop {
        if let Some(status) = listener.try_wait().expect("listener status") {
            break status;
        }
        if start.elapsed() >= Duration::from_secs(8) {
            let _ = listener.kill();
            let _ = listener.wait();
            panic!("listener still running {:?} after interrupt", start.elapsed());
        }
        thread::sleep(Duration::from_millis(25));
    };
    assert!(status.success(), "{status:?}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn destination_without_peer_id_is_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_shardlink"))
        .args(["--log-level", "error", "-d", "/ip4/127.0.0.1/tcp/1"])
        .output()
        .expect("dialer should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: dial failed"), "{stderr}");
}

#[test]
fn unreachable_peer_is_transport_error() {
    let peer = Identity::from_seed(42).peer_id();
    let dest = format!("/ip4/127.0.0.1/tcp/1/p2p/{peer}");
    let output = Command::new(env!("CARGO_BIN_EXE_shardlink"))
        .args(["--log-level", "error", "--connect-timeout", "2s", "-d", &dest])
        .output()
        .expect("dialer should run");

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn invalid_duration_is_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_shardlink"))
        .args(["--log-level", "error", "--read-timeout", "soon"])
        .output()
        .expect("listener should run");

    assert_eq!(output.status.code(), Some(64));
}
