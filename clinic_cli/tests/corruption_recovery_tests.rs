//! Corruption and crash-recovery tests for the clinic binary.
//!
//! These tests verify that:
//! - Malformed or inconsistent data files fail loudly instead of being skipped
//! - An interrupted commit left on disk is finished on the next run
//! - Missing files behave as empty collections

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn setup_test_dir() -> TempDir {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::create_dir_all(temp_dir.path().join("data")).expect("Failed to create data dir");
    fs::write(temp_dir.path().join("config.toml"), "").expect("Failed to write config");
    temp_dir
}

fn data_dir(dir: &Path) -> PathBuf {
    dir.join("data")
}

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("clinic"));
    cmd.arg("--data-dir")
        .arg(data_dir(dir))
        .arg("--config")
        .arg(dir.join("config.toml"));
    cmd
}

const HEADER: &str = "t-1,p-1,c-1,ASSESSED,2024-05-01T09:00:00+00:00,200,false\n";
const ENTRY: &str = "t-1,tt-1,2,checked,200\n";

#[test]
fn test_missing_files_list_empty() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["treatment", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_well_formed_files_load() {
    let temp_dir = setup_test_dir();
    let data = data_dir(temp_dir.path());
    fs::write(data.join("treatments.csv"), HEADER).unwrap();
    fs::write(data.join("treatment_entries.csv"), ENTRY).unwrap();

    cli(temp_dir.path())
        .args(["treatment", "show", "t-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_cost\": 200.0"));
}

#[test]
fn test_bad_status_is_fatal() {
    let temp_dir = setup_test_dir();
    let data = data_dir(temp_dir.path());
    fs::write(
        data.join("treatments.csv"),
        "t-1,p-1,c-1,DONE,2024-05-01T09:00:00+00:00,0,false\n",
    )
    .unwrap();

    cli(temp_dir.path())
        .args(["treatment", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed record"));
}

#[test]
fn test_short_entry_row_is_fatal() {
    let temp_dir = setup_test_dir();
    let data = data_dir(temp_dir.path());
    fs::write(data.join("treatments.csv"), HEADER).unwrap();
    fs::write(data.join("treatment_entries.csv"), "t-1,tt-1,2\n").unwrap();

    cli(temp_dir.path())
        .args(["treatment", "show", "t-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}

#[test]
fn test_orphaned_entry_is_fatal() {
    let temp_dir = setup_test_dir();
    let data = data_dir(temp_dir.path());
    fs::write(data.join("treatments.csv"), HEADER).unwrap();
    fs::write(
        data.join("treatment_entries.csv"),
        format!("{}t-9,tt-1,1,,0\n", ENTRY),
    )
    .unwrap();

    cli(temp_dir.path())
        .args(["treatment", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("inconsistent"));
}

#[test]
fn test_total_mismatch_is_fatal() {
    let temp_dir = setup_test_dir();
    let data = data_dir(temp_dir.path());
    fs::write(data.join("treatments.csv"), HEADER).unwrap();
    fs::write(data.join("treatment_entries.csv"), "t-1,tt-1,2,checked,150\n").unwrap();

    cli(temp_dir.path())
        .args(["treatment", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("inconsistent"));
}

#[test]
fn test_malformed_catalog_blocks_costing() {
    let temp_dir = setup_test_dir();
    let data = data_dir(temp_dir.path());
    fs::write(data.join("treatments.csv"), HEADER).unwrap();
    fs::write(data.join("treatment_entries.csv"), ENTRY).unwrap();
    fs::write(data.join("treatment_types.csv"), "tt-1,Physiotherapy,cheap,true\n").unwrap();

    cli(temp_dir.path())
        .args(["treatment", "cost", "t-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed record"));

    // The stored treatment is unchanged
    let entries = fs::read_to_string(data.join("treatment_entries.csv")).unwrap();
    assert_eq!(entries, ENTRY);
}

#[test]
fn test_sealed_commit_is_finished_on_next_run() {
    let temp_dir = setup_test_dir();
    let data = data_dir(temp_dir.path());

    // Old committed state: treatment still NEW and uncosted
    fs::write(
        data.join("treatments.csv"),
        "t-1,p-1,c-1,NEW,2024-05-01T09:00:00+00:00,0,false\n",
    )
    .unwrap();
    fs::write(data.join("treatment_entries.csv"), "t-1,tt-1,2,,0\n").unwrap();

    // A crash after the header was renamed into place but before the entries were
    let treatments = data.join("treatments.csv");
    let entries = data.join("treatment_entries.csv");
    fs::write(&treatments, HEADER).unwrap();
    fs::write(data.join("treatment_entries.csv.staged"), ENTRY).unwrap();
    let record = serde_json::json!({
        "sealed_at": "2024-05-01T09:05:00Z",
        "files": [
            {
                "target": treatments,
                "staged": data.join("treatments.csv.staged"),
            },
            {
                "target": entries,
                "staged": data.join("treatment_entries.csv.staged"),
            },
        ],
    });
    fs::write(data.join("treatments.commit"), record.to_string()).unwrap();

    cli(temp_dir.path())
        .args(["treatment", "show", "t-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ASSESSED"))
        .stdout(predicate::str::contains("checked"));

    assert!(!data.join("treatments.commit").exists());
    assert!(!data.join("treatment_entries.csv.staged").exists());
    assert_eq!(fs::read_to_string(&entries).unwrap(), ENTRY);
}

#[test]
fn test_unsealed_stage_is_discarded() {
    let temp_dir = setup_test_dir();
    let data = data_dir(temp_dir.path());
    let committed = "t-1,p-1,c-1,NEW,2024-05-01T09:00:00+00:00,0,false\n";
    fs::write(data.join("treatments.csv"), committed).unwrap();
    fs::write(data.join("treatment_entries.csv"), "t-1,tt-1,2,,0\n").unwrap();

    // Staged files with no commit record never became visible
    fs::write(data.join("treatments.csv.staged"), HEADER).unwrap();

    cli(temp_dir.path())
        .args(["treatment", "show", "t-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"NEW\""));

    assert!(!data.join("treatments.csv.staged").exists());
    assert_eq!(fs::read_to_string(data.join("treatments.csv")).unwrap(), committed);
}

#[test]
fn test_invalid_config_is_reported() {
    let temp_dir = setup_test_dir();
    fs::write(temp_dir.path().join("config.toml"), "[data\n").unwrap();

    cli(temp_dir.path())
        .args(["treatment", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TOML error"));
}
