//! Command-line surface: detect, list, get, replay, trust, stats, versions
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

mod utils;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use utils::{standard_streams, WINDOW_END, WINDOW_START};

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        standard_streams().write_jsonl(&dir.path().join("input")).unwrap();
        Self { dir }
    }

    fn store(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("driftwatch").unwrap();
        cmd.arg("--store")
            .arg(self.store())
            .arg("--input")
            .arg(self.dir.path().join("input"));
        cmd
    }

    fn detect(&self) {
        self.cmd()
            .args(["detect", "--start", WINDOW_START, "--end", WINDOW_END])
            .assert()
            .success();
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self
            .cmd()
            .args(["--format", "json"])
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success(), "{:?}", output);
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn test_detect_reports_stored_anomalies() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["detect", "--start", WINDOW_START, "--end", WINDOW_END])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 records evaluated, 2 anomalies stored"))
        .stdout(predicate::str::contains("cost"))
        .stdout(predicate::str::contains("policy"));
    assert_eq!(line_count(&ws.store().join("anomalies.jsonl")), 2);
}

#[test]
fn test_detect_twice_is_refused() {
    let ws = Workspace::new();
    ws.detect();
    ws.cmd()
        .args(["detect", "--start", WINDOW_START, "--end", WINDOW_END])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already processed"));
    assert_eq!(line_count(&ws.store().join("anomalies.jsonl")), 2);
}

#[test]
fn test_detect_rejects_inverted_window() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["detect", "--start", WINDOW_END, "--end", WINDOW_START])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --start/--end window"));
}

#[test]
fn test_list_json_filters_by_type_and_confidence() {
    let ws = Workspace::new();
    ws.detect();

    let all = ws.json(&["list"]);
    assert_eq!(all["count"], 2);

    let confident = ws.json(&["list", "--min-confidence", "0.8"]);
    assert_eq!(confident["count"], 1);
    assert_eq!(confident["records"][0]["anomaly_type"], "policy");

    let cost = ws.json(&["list", "--type", "cost", "--min-confidence", "0.8"]);
    assert_eq!(cost["count"], 0);

    let expr = ws.json(&["list", "-e", "type=cost;source=svc-a"]);
    assert_eq!(expr["count"], 1);
}

#[test]
fn test_list_text_when_empty() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No anomalies found"));
}

#[test]
fn test_get_returns_persisted_shape() {
    let ws = Workspace::new();
    ws.detect();

    let listed = ws.json(&["list", "--type", "cost"]);
    let id = listed["records"][0]["record_id"].as_str().unwrap().to_string();

    let record = ws.json(&["get", &id]);
    assert_eq!(record, listed["records"][0]);
    for field in [
        "record_id",
        "anomaly_type",
        "observed_value",
        "expected_value",
        "deviation_score",
        "confidence",
        "algorithm_version",
        "time_window",
        "timestamp",
        "metric_name",
        "source_id",
    ] {
        assert!(record.get(field).is_some(), "missing field {}", field);
    }
    assert_eq!(record["time_window"]["start"], "2024-06-10T00:00:00Z");
}

#[test]
fn test_get_unknown_record_fails() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["get", "00000000-0000-4000-8000-000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_replay_writes_separate_output_and_leaves_store_alone() {
    let ws = Workspace::new();
    ws.detect();
    let output = ws.path("replay.jsonl");

    ws.cmd()
        .args(["replay", "--start", WINDOW_START, "--end", WINDOW_END, "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("replay output, not stored"))
        .stdout(predicate::str::contains("reproduced the live run (2 records)"));

    assert_eq!(line_count(&output), 2);
    assert_eq!(line_count(&ws.store().join("anomalies.jsonl")), 2);
    assert_eq!(ws.json(&["stats"])["count"], 2);
}

#[test]
fn test_replay_json_is_labelled() {
    let ws = Workspace::new();
    let replay = ws.json(&["replay", "--start", WINDOW_START, "--end", WINDOW_END]);
    assert_eq!(replay["mode"], "replay");
    assert_eq!(replay["algorithm_version"], "1.0.0");
    assert_eq!(replay["verification"]["status"], "not_previously_processed");
    assert_eq!(replay["records"].as_array().unwrap().len(), 2);
}

#[test]
fn test_replay_refuses_output_inside_store() {
    let ws = Workspace::new();
    ws.detect();
    ws.cmd()
        .args(["replay", "--start", WINDOW_START, "--end", WINDOW_END, "--output"])
        .arg(ws.store().join("replay.jsonl"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Refusing to write replay output"));
}

#[test]
fn test_replay_output_cannot_reach_store_through_relative_paths() {
    let ws = Workspace::new();
    ws.detect();
    let live = ws.json(&["list"]);
    let before = fs::read_to_string(ws.store().join("anomalies.jsonl")).unwrap();

    for output in ["./store/anomalies.jsonl", "store/../store/anomalies.jsonl", "input/../store/replay.jsonl"] {
        ws.cmd()
            .current_dir(ws.dir.path())
            .args(["replay", "--start", WINDOW_START, "--end", WINDOW_END, "--output", output])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Refusing to write replay output"));
    }

    assert_eq!(fs::read_to_string(ws.store().join("anomalies.jsonl")).unwrap(), before);
    assert!(!ws.store().join("replay.jsonl").exists());
    let id = live["records"][0]["record_id"].as_str().unwrap().to_string();
    assert_eq!(ws.json(&["get", &id]), live["records"][0]);
}

#[test]
fn test_replay_output_never_overwrites_existing_file() {
    let ws = Workspace::new();
    let output = ws.path("replay.jsonl");
    fs::write(&output, "keep me\n").unwrap();

    ws.cmd()
        .args(["replay", "--start", WINDOW_START, "--end", WINDOW_END, "--output"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("never replaces an existing file"));
    assert_eq!(fs::read_to_string(&output).unwrap(), "keep me\n");
}

#[test]
fn test_trust_hours_out_of_range_fails_cleanly() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["trust", "--hours", "9999999999999"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("outside the representable time range"));
}

#[test]
fn test_replay_unknown_version_fails() {
    let ws = Workspace::new();
    ws.cmd()
        .args([
            "replay",
            "--start",
            WINDOW_START,
            "--end",
            WINDOW_END,
            "--algorithm-version",
            "0.0.0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown algorithm version '0.0.0'"));
}

#[test]
fn test_trust_over_processed_window() {
    let ws = Workspace::new();
    ws.detect();
    let signal = ws.json(&["trust", "--start", WINDOW_START, "--end", WINDOW_END]);
    assert_eq!(signal["contributing_counts"]["cost"], 1);
    assert_eq!(signal["contributing_counts"]["policy"], 1);
    let score = signal["composite_score"].as_f64().unwrap();
    assert!(score > 0.0 && score < 1.0);
}

#[test]
fn test_trust_default_window_text() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["trust", "--hours", "12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("composite_score: 0.0000 (high trust)"));
}

#[test]
fn test_stats_cover_every_type() {
    let ws = Workspace::new();
    ws.detect();
    let stats = ws.json(&["stats"]);
    assert_eq!(stats["count"], 2);
    assert_eq!(stats["runs"], 1);
    assert_eq!(stats["persistent"], true);
    for t in ["cost", "quality", "latency", "policy"] {
        assert!(stats["counts_by_type"].get(t).is_some(), "missing {}", t);
    }
    assert_eq!(stats["counts_by_type"]["latency"], 0);
}

#[test]
fn test_versions_from_catalog_file() {
    let ws = Workspace::new();
    let catalog = ws.path("catalog.toml");
    fs::write(
        &catalog,
        r#"
active = "2.0.0"

[[algorithm]]
algorithm_version = "1.0.0"

[[algorithm]]
algorithm_version = "2.0.0"
min_confidence = 0.8
"#,
    )
    .unwrap();

    ws.cmd()
        .arg("--catalog")
        .arg(&catalog)
        .arg("versions")
        .assert()
        .success()
        .stdout(predicate::str::contains("  1.0.0"))
        .stdout(predicate::str::contains("* 2.0.0"));

    // the active version drives live detection
    ws.cmd()
        .arg("--catalog")
        .arg(&catalog)
        .args(["detect", "--start", WINDOW_START, "--end", WINDOW_END])
        .assert()
        .success()
        .stdout(predicate::str::contains("under 2.0.0"))
        .stdout(predicate::str::contains("1 anomalies stored"));
}

#[test]
fn test_settings_file() {
    let ws = Workspace::new();
    let settings = ws.path("driftwatch.toml");
    fs::write(
        &settings,
        format!(
            "store_path = {:?}\ninput_dir = {:?}\n",
            ws.path("other-store"),
            ws.path("input")
        ),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("driftwatch").unwrap();
    cmd.arg("--config")
        .arg(&settings)
        .args(["detect", "--start", WINDOW_START, "--end", WINDOW_END])
        .assert()
        .success();
    assert_eq!(line_count(&ws.path("other-store").join("anomalies.jsonl")), 2);
}

#[test]
fn test_invalid_catalog_is_reported() {
    let ws = Workspace::new();
    let catalog = ws.path("catalog.toml");
    fs::write(&catalog, "[[algorithm]]\nalgorithm_version = \"1.0.0\"\nmin_confidence = 7.0\n").unwrap();
    ws.cmd()
        .arg("--catalog")
        .arg(&catalog)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration for algorithm 1.0.0"));
}
