// The cargo_bin! macro requires build script setup that's overkill for simple tests.
// Suppress deprecation warning on the function until we need custom build-dir support.
#![allow(deprecated)]

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn frontline() -> Command {
    Command::new(cargo_bin("frontline"))
}

#[test]
fn test_help_flag() {
    frontline()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("--scenario"))
        .stdout(predicate::str::contains("--trials"));
}

#[test]
fn test_missing_scenario_reports_path() {
    frontline()
        .arg("--scenario")
        .arg("/nonexistent/scenario.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/scenario.json"));
}

#[test]
fn test_low_luck_assault_conquers() {
    frontline()
        .arg("--scenario")
        .arg(fixture("karelia.json"))
        .arg("--low-luck")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"result\": \"conquered\""))
        .stdout(predicate::str::contains("\"ownership_change\""));
}

#[test]
fn test_same_seed_same_output() {
    let run = |seed: &str| {
        frontline()
            .arg("--scenario")
            .arg(fixture("karelia.json"))
            .arg("--seed")
            .arg(seed)
            .output()
            .expect("failed to execute")
    };
    let a = run("7");
    let b = run("7");
    assert!(a.status.success());
    assert_eq!(a.stdout, b.stdout);
}

#[test]
fn test_raid_reports_damage() {
    let output = frontline()
        .arg("--scenario")
        .arg(fixture("raid.json"))
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let outcomes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let raid = &outcomes[0];
    assert_eq!(raid["kind"], "bombing_raid");
    assert_eq!(raid["result"], "bombed");
    let after = raid["production_damage"]["capacity_after"].as_u64().unwrap();
    assert!(after < 10);
}

#[test]
fn test_odds_mode() {
    let output = frontline()
        .arg("--scenario")
        .arg(fixture("karelia.json"))
        .arg("--trials")
        .arg("50")
        .arg("--low-luck")
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["trials"], 50);
    assert_eq!(summary["battles"][0]["attacker_wins"].as_f64(), Some(1.0));
}

#[test]
fn test_event_log_written() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("combat.jsonl");

    frontline()
        .arg("--scenario")
        .arg(fixture("karelia.json"))
        .arg("--low-luck")
        .arg("--event-log")
        .arg(&log)
        .assert()
        .success();

    let text = std::fs::read_to_string(&log).unwrap();
    let first = text.lines().next().unwrap();
    assert!(first.contains("\"type\":\"battle_started\""), "first line: {}", first);
    assert!(text.contains("battle_ended"));
}

#[test]
fn test_unknown_unit_type_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    let text = std::fs::read_to_string(fixture("karelia.json"))
        .unwrap()
        .replace("\"armour\"", "\"zeppelin\"");
    std::fs::write(&path, text).unwrap();

    frontline()
        .arg("--scenario")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("zeppelin"));
}
