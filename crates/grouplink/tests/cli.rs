#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const NAMESPACE: &str = "cli.test";

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/glcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn grouplink(runtime_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_grouplink"));
    cmd.env("GROUPLINK_RUNTIME_DIR", runtime_dir)
        .env("GROUPLINK_NAMESPACE", NAMESPACE)
        .arg("--log-level")
        .arg("error");
    cmd
}

fn spawn_listener(runtime_dir: &Path, extra: &[&str]) -> Child {
    let child = grouplink(runtime_dir)
        .arg("--format")
        .arg("json")
        .arg("listen")
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("listen command should start");

    let socket = runtime_dir.join(NAMESPACE).join("0.sock");
    let start = Instant::now();
    while !socket.exists() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "listener never bound {}",
            socket.display()
        );
        thread::sleep(Duration::from_millis(25));
    }
    child
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Output {
    let start = Instant::now();
    while child.try_wait().expect("child should be pollable").is_none() {
        if start.elapsed() >= timeout {
            let _ = child.kill();
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }
    child.wait_with_output().expect("child output should be readable")
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_grouplink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("grouplink {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn send_without_server_is_a_transport_error() {
    let dir = unique_temp_dir("no-server");

    let output = grouplink(&dir)
        .arg("send")
        .arg("--name")
        .arg("ping")
        .arg("--timeout")
        .arg("2s")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect failed"), "{stderr}");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_reaches_listener() {
    let dir = unique_temp_dir("roundtrip");
    let listener = spawn_listener(&dir, &["--count", "1"]);

    let send = grouplink(&dir)
        .arg("send")
        .arg("--identity")
        .arg("cli-sender")
        .arg("--name")
        .arg("add-name")
        .arg("--field")
        .arg("name=Ada")
        .arg("--field")
        .arg("age:int=36")
        .output()
        .expect("send should run");
    assert!(
        send.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&send.stderr)
    );

    let output = wait_with_timeout(listener, Duration::from_secs(5));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line: serde_json::Value = serde_json::from_str(
        stdout.lines().next().expect("listener should print one message"),
    )
    .expect("listener should emit json");

    assert_eq!(line["name"], "add-name");
    assert_eq!(line["sender"]["name"], "cli-sender");
    assert_eq!(line["payload"]["name"], "Ada");
    assert_eq!(line["payload"]["age"], 36);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn rejected_sender_exits_with_permission_denied() {
    let dir = unique_temp_dir("reject");
    let mut listener = spawn_listener(&dir, &["--reject", "intruder"]);

    let output = grouplink(&dir)
        .arg("send")
        .arg("--identity")
        .arg("intruder")
        .arg("--name")
        .arg("ping")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(50));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("intruder is not admitted"), "{stderr}");

    let _ = listener.kill();
    let _ = listener.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn disallowed_custom_kind_is_a_data_error() {
    let dir = unique_temp_dir("custom");
    let mut listener = spawn_listener(&dir, &[]);

    let output = grouplink(&dir)
        .arg("send")
        .arg("--name")
        .arg("moved")
        .arg("--json-kind")
        .arg("point")
        .arg("--field")
        .arg(r#"at:json={"x":1}"#)
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(60));

    let _ = listener.kill();
    let _ = listener.wait();
    let _ = std::fs::remove_dir_all(&dir);
}
