//! Exit-code contract of the binary: 0 on watchdog-triggered
//! shutdown, non-zero on configuration failure.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_missing_config_file_exits_nonzero() {
    let mut cmd = Command::cargo_bin("docharvest").unwrap();
    cmd.arg("/nonexistent/run.conf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration"));
}

#[test]
fn test_malformed_config_line_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("run.conf");
    fs::write(&config_path, "logcollector = out.xml\nnot a key value line\n").unwrap();

    let mut cmd = Command::cargo_bin("docharvest").unwrap();
    cmd.arg(&config_path).assert().failure();
}

#[test]
fn test_missing_log_collector_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("run.conf");
    fs::write(&config_path, "filter = *.pdf\n").unwrap();

    let mut cmd = Command::cargo_bin("docharvest").unwrap();
    cmd.arg(&config_path).assert().failure();
}

#[test]
fn test_no_arguments_exits_nonzero() {
    let mut cmd = Command::cargo_bin("docharvest").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_minimal_run_exits_zero_with_closed_log() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir(&docs).unwrap();
    fs::write(docs.join("a.pdf"), b"%PDF-1.4\n%%EOF\n").unwrap();
    let log_path = tmp.path().join("run.xml");
    let config_path = tmp.path().join("run.conf");
    fs::write(
        &config_path,
        format!(
            "filter = *.pdf\nfinder:numhits = 5\nfilesystemscan = {}\n\
             fakedownloader = yes\nlogcollector = {}\n",
            docs.display(),
            log_path.display(),
        ),
    )
    .unwrap();

    // The watchdog needs its full idle window (~7s at the default
    // cadence) before it declares the run complete
    let mut cmd = Command::cargo_bin("docharvest").unwrap();
    cmd.arg(&config_path)
        .arg("--quiet")
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success();

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.starts_with("<?xml version=\"1.0\""));
    assert!(log.contains("<filefinder event=\"hit\""));
    assert!(log.contains("</log>"));
}
