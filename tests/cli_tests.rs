//! CLI integration tests using assert_cmd.
//!
//! Every test runs the binary inside its own temporary directory with a file
//! ledger, so no database is needed and no state leaks between tests.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

#[allow(deprecated)]
fn cofactor(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cofactor").unwrap();
    cmd.current_dir(dir)
        .env_remove("DATABASE_URL")
        .env("RUST_LOG", "warn")
        .arg("--ledger")
        .arg(dir.join("test.ledger"))
        .arg("--output")
        .arg(dir.join("out.txt"))
        .args(["--workers", "2"]);
    cmd
}

// --- Help and arg validation ---

#[test]
fn help_shows_all_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("resume"))
            .and(predicate::str::contains("jobs"))
            .and(predicate::str::contains("pairs"))
            .and(predicate::str::contains("--database-url")),
    );
}

#[test]
fn missing_subcommand_fails() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path()).assert().failure();
}

#[test]
fn non_numeric_input_is_rejected_without_state() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["run", "12abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid input"));
    assert!(!dir.path().join("test.ledger").exists());
    assert!(!dir.path().join("out.txt").exists());
}

#[test]
fn out_of_domain_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["run", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid input"));
}

// --- Factorization ---

#[test]
fn run_prints_result_line_and_appends_output() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["run", "600"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("600 : 2,2,2,3,5,5")
                .and(predicate::str::contains("Execution time")),
        );
    cofactor(dir.path())
        .args(["run", "91"])
        .assert()
        .success()
        .stdout(predicate::str::contains("91 : 7,13"));

    let log = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
    assert_eq!(log, "600 : 2,2,2,3,5,5\n91 : 7,13\n");
}

#[test]
fn prime_input_yields_itself() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["run", "97"])
        .assert()
        .success()
        .stdout(predicate::str::contains("97 : 97"));
}

#[test]
fn finished_job_is_removed_from_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path()).args(["run", "91"]).assert().success();
    cofactor(dir.path())
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("No unfinished jobs"));
}

fn logged_factors(dir: &Path) -> Vec<Vec<u64>> {
    std::fs::read_to_string(dir.join("out.txt"))
        .unwrap()
        .lines()
        .map(|line| {
            let (_, list) = line.split_once(" : ").unwrap();
            let mut factors: Vec<u64> = list.split(',').map(|f| f.parse().unwrap()).collect();
            factors.sort_unstable();
            factors
        })
        .collect()
}

#[test]
fn slack_flag_still_factors_completely() {
    // Early stop may change discovery order, never the multiset
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["--slack", "run", "1001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1001 : "));
    cofactor(dir.path())
        .args(["--slack=0", "run", "1001"])
        .assert()
        .success();
    assert_eq!(logged_factors(dir.path()), vec![vec![7, 11, 13], vec![7, 11, 13]]);
}

#[test]
fn memory_store_needs_no_files() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["--store", "memory", "run", "15"])
        .assert()
        .success()
        .stdout(predicate::str::contains("15 : 3,5"));
    assert!(!dir.path().join("test.ledger").exists());
}

#[test]
fn config_file_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("custom.toml"), "mr_rounds = 10\nstatus_interval_secs = 5\n").unwrap();
    cofactor(dir.path())
        .arg("--config")
        .arg(dir.path().join("custom.toml"))
        .args(["run", "21"])
        .assert()
        .success()
        .stdout(predicate::str::contains("21 : 3,7"));
}

#[test]
fn invalid_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.toml"), "workers = 0\n").unwrap();
    cofactor(dir.path())
        .arg("--config")
        .arg(dir.path().join("bad.toml"))
        .args(["run", "21"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers must be at least 1"));
}

// --- Jobs and resume ---

#[test]
fn jobs_on_empty_ledger() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("No unfinished jobs"));
}

#[test]
fn resume_unknown_job_fails() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["resume", "--job", "7f1c1a4e-3d8b-4b65-9a59-0c6f0b2d9e11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No unfinished job"));
}

#[test]
fn resume_rejects_malformed_job_id() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["resume", "--job", "not-a-uuid"])
        .assert()
        .failure();
}

// --- Prime pairs ---

#[test]
fn pairs_prints_the_prime_split() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["pairs", "91"])
        .assert()
        .success()
        .stdout(predicate::str::contains("91 : 7 x 13"));
}

#[test]
fn pairs_reports_none_for_composite_cofactors() {
    let dir = tempfile::tempdir().unwrap();
    cofactor(dir.path())
        .args(["pairs", "600", "--limit", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("600 : no prime pairs"));
}
