use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use hdebug_contracts::{
    HDEBUG_DIAG_SCHEMA_VERSION, HDEBUG_REPORT_SCHEMA_VERSION, HDEBUG_TRACE_SCHEMA_VERSION,
};
use serde_json::{json, Value};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_dir(prefix: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = base.join(format!("{prefix}_{pid}_{n}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_trace(ops: Value) -> PathBuf {
    let dir = temp_dir("hdebug_cli");
    let path = dir.join("trace.json");
    let trace = json!({"schema_version": HDEBUG_TRACE_SCHEMA_VERSION, "ops": ops});
    std::fs::write(&path, serde_json::to_vec(&trace).unwrap()).expect("write trace");
    path
}

fn run_hdebug(args: &[&str]) -> std::process::Output {
    let bin = env!("CARGO_BIN_EXE_hdebug");
    Command::new(bin)
        .args(args)
        .env_remove("HDEBUG_CLOSED_QUEUE_MAX")
        .env_remove("HDEBUG_SINGLETON")
        .env("RUST_LOG", "off")
        .output()
        .expect("run hdebug")
}

fn parse_json_stdout(out: &std::process::Output) -> Value {
    serde_json::from_slice(&out.stdout).expect("parse stdout JSON")
}

#[test]
fn replay_clean_trace_exits_zero() {
    let trace = write_trace(json!([
        {"op": "from_i64", "value": 5, "as": "a"},
        {"op": "dup", "handle": "a", "as": "b"},
        {"op": "is", "a": "a", "b": "b"},
        {"op": "close", "handle": "a"},
        {"op": "close", "handle": "b"},
    ]));
    let out = run_hdebug(&["replay", "--trace", trace.to_str().unwrap()]);
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], HDEBUG_REPORT_SCHEMA_VERSION);
    assert_eq!(v["ok"], true);
    assert_eq!(v["ops_total"], 5);
    assert_eq!(v["results"][2]["is"], true);
    assert_eq!(v["diagnostics"].as_array().map(Vec::len), Some(0));
}

#[test]
fn replay_reports_violations_with_exit_one() {
    let trace = write_trace(json!([
        {"op": "from_i64", "value": 7, "as": "a"},
        {"op": "close", "handle": "a"},
        {"op": "as_i64", "handle": "a"},
        {"op": "close", "handle": "a"},
        {"op": "from_i64", "value": 8, "as": "leak"},
    ]));
    let out = run_hdebug(&["replay", "--trace", trace.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    let v = parse_json_stdout(&out);
    assert_eq!(v["ok"], false);
    let codes: Vec<&str> = v["diagnostics"]
        .as_array()
        .expect("diagnostics[]")
        .iter()
        .map(|d| d["code"].as_str().expect("code"))
        .collect();
    assert_eq!(codes, vec!["HDBG0101UseAfterClose", "HDBG0102DoubleClose"]);
    assert_eq!(v["results"][2]["error"], "HDBG0101");
    assert_eq!(v["leaks"].as_array().map(Vec::len), Some(1));
    assert_eq!(v["leaks"][0]["handle"], v["results"][4]["handle"]);
}

#[test]
fn closed_queue_flag_turns_stale_handles_invalid() {
    let trace = write_trace(json!([
        {"op": "from_i64", "value": 1, "as": "a"},
        {"op": "close", "handle": "a"},
        {"op": "from_i64", "value": 2, "as": "b"},
        {"op": "close", "handle": "b"},
        {"op": "from_i64", "value": 3, "as": "c"},
        {"op": "as_i64", "handle": "a"},
        {"op": "close", "handle": "c"},
    ]));
    let out = run_hdebug(&[
        "replay",
        "--trace",
        trace.to_str().unwrap(),
        "--closed-queue-max",
        "1",
    ]);
    assert_eq!(out.status.code(), Some(1));
    let v = parse_json_stdout(&out);
    assert_eq!(v["results"][5]["error"], "HDBG0100");
}

#[test]
fn bad_trace_exits_two() {
    let dir = temp_dir("hdebug_cli_bad");
    let path = dir.join("trace.json");
    std::fs::write(&path, br#"{"schema_version": "other@1", "ops": []}"#).expect("write");
    let out = run_hdebug(&["replay", "--trace", path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("schema_version"), "stderr:\n{stderr}");

    let out = run_hdebug(&["replay", "--trace", dir.join("missing.json").to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn diagnostics_catalog() {
    let out = run_hdebug(&["diagnostics"]);
    assert_eq!(out.status.code(), Some(0));
    let md = String::from_utf8_lossy(&out.stdout);
    assert!(md.starts_with("# hdebug diagnostics catalog"));
    assert!(md.contains("| HDBG0102 |"));

    let out = run_hdebug(&["diagnostics", "--json"]);
    assert_eq!(out.status.code(), Some(0));
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], HDEBUG_DIAG_SCHEMA_VERSION);
    assert_eq!(v["codes"].as_array().map(Vec::len), Some(6));
    assert_eq!(v["codes"][0]["code"], "HDBG0001");
}
