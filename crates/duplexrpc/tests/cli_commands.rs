#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use duplexrpc_peer::connect;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/dxcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spawn_serve(sock_path: &Path, extra: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_duplexrpc"))
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg(sock_path)
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket never appeared at {}", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn wait_for_connect(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if let Ok(duplex) = connect(path) {
            let _ = duplex.close();
            return;
        }
        if start.elapsed() >= timeout {
            panic!("connect timeout");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn run_call(sock_path: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_duplexrpc"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("call")
        .arg(sock_path)
        .args(args)
        .output()
        .expect("call should run")
}

fn stop(mut child: Child, dir: &Path) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn call_echo_against_serve_prints_result() {
    let dir = unique_temp_dir("echo");
    let sock_path = dir.join("echo.sock");
    let child = spawn_serve(&sock_path, &[]);
    wait_for_connect(&sock_path, Duration::from_secs(3));

    let output = run_call(&sock_path, &["Echo.Echo", "--json", r#"{"name":"Anto"}"#]);

    assert!(output.status.success(), "call failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout should be one JSON object");
    assert_eq!(line["method"], "Echo.Echo");
    assert_eq!(line["result"], serde_json::json!({ "name": "Anto" }));

    stop(child, &dir);
}

#[test]
fn remote_error_exits_with_2() {
    let dir = unique_temp_dir("fail");
    let sock_path = dir.join("echo.sock");
    let child = spawn_serve(&sock_path, &[]);
    wait_for_connect(&sock_path, Duration::from_secs(3));

    let output = run_call(&sock_path, &["Echo.Fail", "--json", r#""on purpose""#]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("on purpose"), "stderr was: {stderr}");

    stop(child, &dir);
}

#[test]
fn unknown_method_is_reported_by_server() {
    let dir = unique_temp_dir("unknown");
    let sock_path = dir.join("echo.sock");
    let child = spawn_serve(&sock_path, &[]);
    wait_for_connect(&sock_path, Duration::from_secs(3));

    let output = run_call(&sock_path, &["Echo.Nope"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown method 'Echo.Nope'"), "stderr was: {stderr}");

    stop(child, &dir);
}

#[test]
fn handshake_on_both_sides_succeeds() {
    let dir = unique_temp_dir("handshake");
    let sock_path = dir.join("echo.sock");
    let child = spawn_serve(&sock_path, &["--handshake"]);
    wait_for_socket(&sock_path, Duration::from_secs(3));

    let output = run_call(&sock_path, &["Echo.Ping", "--handshake"]);

    assert!(output.status.success(), "call failed: {output:?}");
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"result\":\"pong\""));

    stop(child, &dir);
}

#[test]
fn serve_exits_after_max_connections() {
    let dir = unique_temp_dir("max");
    let sock_path = dir.join("echo.sock");
    let mut child = spawn_serve(&sock_path, &["--max-connections", "1"]);
    wait_for_socket(&sock_path, Duration::from_secs(3));

    let output = run_call(&sock_path, &["Echo.Ping"]);
    assert!(output.status.success(), "call failed: {output:?}");

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().expect("serve status should be readable") {
            break status;
        }
        if start.elapsed() >= Duration::from_secs(5) {
            let _ = child.kill();
            panic!("serve did not exit after its last connection");
        }
        thread::sleep(Duration::from_millis(25));
    };
    assert!(status.success());
    assert!(!sock_path.exists(), "socket file should be removed on exit");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn call_to_missing_socket_exits_with_3() {
    let dir = unique_temp_dir("missing");
    let output = run_call(&dir.join("missing.sock"), &["Echo.Ping"]);

    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn malformed_method_is_usage_error() {
    let dir = unique_temp_dir("usage");
    let output = run_call(&dir.join("unused.sock"), &["NoDot"]);

    assert_eq!(output.status.code(), Some(64));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_duplexrpc"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("duplexrpc {}", env!("CARGO_PKG_VERSION")));
}
