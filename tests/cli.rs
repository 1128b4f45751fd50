//! End-to-end CLI tests using assert_cmd.
//!
//! These tests run the actual querybot binary and verify stderr and exit
//! codes. None of them needs a running voice server.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A scratch directory used as the config home, so no real user config is read.
struct TestEnv {
    dir: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        let dir = std::env::temp_dir().join(format!("querybot-cli-test-{pid}-{id}"));
        std::fs::create_dir_all(&dir).expect("create test dir");
        Self { dir }
    }

    fn querybot(&self) -> Command {
        let mut cmd = Command::cargo_bin("querybot").unwrap();
        cmd.env("XDG_CONFIG_HOME", &self.dir)
            .env("HOME", &self.dir)
            .env_remove("RUST_LOG")
            .env_remove("QUERYBOT_CONFIG")
            .env_remove("QUERYBOT_HOST")
            .env_remove("QUERYBOT_QUERY_PORT")
            .env_remove("QUERYBOT_USERNAME")
            .env_remove("QUERYBOT_PASSWORD");
        cmd
    }

    fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.dir.join("config.json");
        std::fs::write(&path, contents).expect("write config");
        path
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

/// A local port with nothing listening on it.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

#[test]
fn test_help() {
    Command::cargo_bin("querybot")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ServerQuery chat command bot"))
        .stdout(predicate::str::contains("--host"))
        .stdout(predicate::str::contains("--username"))
        .stdout(predicate::str::contains("--max-reconnect-attempts"));
}

#[test]
fn test_version() {
    Command::cargo_bin("querybot")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("querybot"));
}

#[test]
fn test_missing_credentials() {
    let env = TestEnv::new();
    env.querybot()
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("missing required setting: username"));
}

#[test]
fn test_missing_config_file() {
    let env = TestEnv::new();
    env.querybot()
        .args(["--config", "/nonexistent/querybot.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn test_invalid_config_file() {
    let env = TestEnv::new();
    let path = env.write_config("{ not json");
    env.querybot()
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config file"));
}

#[test]
fn test_connection_refused_exits_with_error() {
    let env = TestEnv::new();
    let port = closed_port();
    env.querybot()
        .args(["--host", "127.0.0.1", "--username", "bot", "--password", "pw"])
        .args(["--port", &port.to_string()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Could not establish initial connection"));
}

#[test]
fn test_config_file_and_flag_override() {
    let env = TestEnv::new();
    let port = closed_port();
    let path = env.write_config(r#"{"host": "127.0.0.1", "query_port": 1, "username": "bot", "password": "pw"}"#);

    // The flag wins over the file's port
    env.querybot()
        .arg("--config")
        .arg(&path)
        .args(["--port", &port.to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains(format!("127.0.0.1:{port}")));
}
