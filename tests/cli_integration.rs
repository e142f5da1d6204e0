// CLI integration tests for administration and record flows.
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_hsekv");
    Command::new(exe)
}

fn run(home: &Path, args: &[&str]) -> Output {
    cmd()
        .arg("--home")
        .arg(home)
        .args(args)
        .output()
        .expect("run hsekv")
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    parse_json(std::str::from_utf8(&output.stdout).expect("utf8"))
}

fn stderr_error(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .expect("stderr line");
    parse_json(line)
}

#[test]
fn create_put_get_scan_delete_flow() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path();

    let created = stdout_json(&run(home, &["kvdb", "create"]));
    assert_eq!(created["created"], true);

    let kvs = stdout_json(&run(home, &["kvs", "create", "users", "--prefix-length", "4"]));
    assert_eq!(kvs["kvs"], "users");
    assert_eq!(kvs["prefix_length"], 4);

    for (key, value) in [("usr:alice", "31"), ("usr:bob", "42"), ("adm:root", "0")] {
        let put = stdout_json(&run(home, &["put", "users", key, value]));
        assert_eq!(put["stored"], true);
    }

    let get = stdout_json(&run(home, &["get", "users", "usr:bob"]));
    assert_eq!(get["value"], "42");
    assert_eq!(get["len"], 2);

    let scan = stdout_json(&run(home, &["scan", "users", "--filter", "usr:"]));
    assert_eq!(scan["count"], 2);
    assert_eq!(scan["records"][0]["key"], "usr:alice");
    assert_eq!(scan["records"][1]["key"], "usr:bob");

    let reverse = stdout_json(&run(home, &["scan", "users", "--reverse", "--limit", "2"]));
    assert_eq!(reverse["count"], 2);
    assert_eq!(reverse["records"][0]["key"], "usr:bob");
    assert_eq!(reverse["records"][1]["key"], "usr:alice");

    let from = stdout_json(&run(home, &["scan", "users", "--from", "usr:b"]));
    assert_eq!(from["count"], 1);
    assert_eq!(from["records"][0]["value"], "42");

    let del = stdout_json(&run(home, &["del", "users", "usr:", "--prefix"]));
    assert_eq!(del["deleted"], true);
    let rest = stdout_json(&run(home, &["scan", "users"]));
    assert_eq!(rest["count"], 1);
    assert_eq!(rest["records"][0]["key"], "adm:root");

    let missing = run(home, &["get", "users", "usr:bob"]);
    assert_eq!(missing.status.code(), Some(3));
    let err = stderr_error(&missing);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert_eq!(err["error"]["kvs"], "users");
}

#[test]
fn kvdb_info_and_kvs_listing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path();
    stdout_json(&run(home, &["kvdb", "create"]));
    stdout_json(&run(home, &["kvs", "create", "alpha"]));
    stdout_json(&run(home, &["kvs", "create", "beta", "--prefix-length", "2"]));

    let list = stdout_json(&run(home, &["kvs", "list"]));
    assert_eq!(list["kvs"], serde_json::json!(["alpha", "beta"]));

    let info = stdout_json(&run(home, &["kvdb", "info"]));
    assert_eq!(info["kvs"][1]["name"], "beta");
    assert_eq!(info["kvs"][1]["prefix_length"], 2);
    assert!(info["mclass"]["capacity"]["path"].as_str().is_some());
    assert!(info["mclass"].get("staging").is_none());
    assert_eq!(info["compact"]["samp_lwm"], 117);
    assert_eq!(info["params"]["read_only"], "false");

    let dropped = stdout_json(&run(home, &["kvs", "drop", "alpha"]));
    assert_eq!(dropped["dropped"], true);
    let list = stdout_json(&run(home, &["kvs", "list"]));
    assert_eq!(list["kvs"], serde_json::json!(["beta"]));

    stdout_json(&run(home, &["kvdb", "drop"]));
    let gone = run(home, &["kvs", "list"]);
    assert_eq!(gone.status.code(), Some(3));
}

#[test]
fn errors_map_to_stable_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path();

    let no_kvdb = run(home, &["kvs", "list"]);
    assert_eq!(no_kvdb.status.code(), Some(3));
    assert_eq!(stderr_error(&no_kvdb)["error"]["kind"], "NotFound");

    stdout_json(&run(home, &["kvdb", "create"]));
    let again = run(home, &["kvdb", "create"]);
    assert_eq!(again.status.code(), Some(4));
    assert_eq!(stderr_error(&again)["error"]["kind"], "AlreadyExists");

    let bad_param = run(home, &["--param", "nonsense", "kvs", "list"]);
    assert_eq!(bad_param.status.code(), Some(2));
    assert_eq!(stderr_error(&bad_param)["error"]["kind"], "Usage");

    stdout_json(&run(home, &["kvs", "create", "flat"]));
    let prefix_on_flat = run(home, &["del", "flat", "x", "--prefix"]);
    assert_eq!(prefix_on_flat.status.code(), Some(2));

    let read_only = run(home, &["--param", "read_only=true", "put", "flat", "k", "v"]);
    assert_eq!(read_only.status.code(), Some(6));
    assert_eq!(stderr_error(&read_only)["error"]["errno"], libc::EROFS);

    let bad_args = cmd().args(["scan"]).output().expect("run");
    assert_eq!(bad_args.status.code(), Some(2));
    assert_eq!(stderr_error(&bad_args)["error"]["kind"], "Usage");
}

#[test]
fn version_and_completion() {
    let version = cmd().arg("version").output().expect("version");
    let value = stdout_json(&version);
    assert_eq!(value["name"], "hsekv");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));

    let completion = cmd().args(["completion", "bash"]).output().expect("completion");
    assert!(completion.status.success());
    assert!(String::from_utf8_lossy(&completion.stdout).contains("hsekv"));
}

#[test]
fn relative_home_survives_a_different_working_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(temp.path().join("db")).expect("home dir");

    let relative = |args: &[&str]| {
        cmd()
            .current_dir(temp.path())
            .args(["--home", "db"])
            .args(args)
            .output()
            .expect("run hsekv")
    };
    stdout_json(&relative(&["kvdb", "create"]));
    stdout_json(&relative(&["kvs", "create", "kvs"]));
    stdout_json(&relative(&["put", "kvs", "key", "value"]));

    let elsewhere = tempfile::tempdir().expect("tempdir");
    let get = cmd()
        .current_dir(elsewhere.path())
        .arg("--home")
        .arg(temp.path().join("db"))
        .args(["get", "kvs", "key"])
        .output()
        .expect("run hsekv");
    assert_eq!(stdout_json(&get)["value"], "value");
}
