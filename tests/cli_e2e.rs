//! End-to-end CLI tests for the harvester binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a command isolated from the user's real config file.
fn harvester(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

fn db_arg(dir: &TempDir) -> String {
    dir.path().join("tasks.db").to_string_lossy().into_owned()
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let temp_dir = TempDir::new().unwrap();
    harvester(temp_dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Coordinate greeks history downloads"))
        .stdout(predicate::str::contains("enqueue"))
        .stdout(predicate::str::contains("reclaim"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let temp_dir = TempDir::new().unwrap();
    harvester(temp_dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvester"));
}

/// A subcommand is required.
#[test]
fn test_binary_without_subcommand_fails() {
    let temp_dir = TempDir::new().unwrap();
    harvester(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let temp_dir = TempDir::new().unwrap();
    harvester(temp_dir.path())
        .args(["status", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_enqueue_then_status_reports_pending_counts() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "enqueue"])
        .args(["SPXW,2024-06-21,2024-06-20", "SPXW,2024-06-21,2024-06-18"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued 2 task(s), 0 already present"));

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "enqueue", "SPXW,2024-06-21,2024-06-20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued 0 task(s), 1 already present"));

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "status", "--list", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"pending\s+2").unwrap())
        .stdout(predicate::str::is_match(r"total\s+2").unwrap())
        .stdout(predicate::str::contains("SPXW 2024-06-21 2024-06-18"));
}

#[test]
fn test_enqueue_reads_stdin_and_skips_comments() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "enqueue"])
        .write_stdin("# symbol,expiration,date\nSPX,2024-06-21,2024-06-20\n\nSPX,2024-06-21,2024-06-17\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued 2 task(s)"));
}

#[test]
fn test_enqueue_invalid_line_enqueues_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "enqueue"])
        .args(["SPX,2024-06-21,2024-06-20", "SPX,not-a-date,2024-06-20"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nothing was enqueued"))
        .stderr(predicate::str::contains("line 2"));

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending\": 0"));
}

#[test]
fn test_status_json_is_machine_readable() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "enqueue", "SPX,2024-06-21,2024-06-20"])
        .assert()
        .success();

    let output = harvester(temp_dir.path())
        .args(["-q", "--db", &db, "status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let counts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(counts["pending"], 1);
    assert_eq!(counts["in_progress"], 0);
    assert_eq!(counts["completed"], 0);
    assert_eq!(counts["failed"], 0);
}

#[test]
fn test_work_requires_max_retries() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["--db", &db, "work", "--lease-timeout-secs", "600"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_retries is not configured"));
}

#[test]
fn test_reclaim_requires_lease_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["--db", &db, "reclaim"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("lease timeout is not configured"));
}

#[test]
fn test_reclaim_with_nothing_stale_reports_zero() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "reclaim", "-t", "600"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reclaimed 0 lease(s) older than 600s"));
}

#[test]
fn test_reset_requires_a_target() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["--db", &db, "reset"])
        .assert()
        .failure();

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "reset", "--failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reset 0 failed task(s) to pending"));
}

#[test]
fn test_reset_unknown_task_fails() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "reset", "SPX,2024-06-21,2024-06-20"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task not found"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");

    harvester(temp_dir.path())
        .args(["--config", &missing.to_string_lossy(), "status"])
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_work_drains_catalog_using_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);
    let data_dir = temp_dir.path().join("data");

    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/option/history/greeks/all"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("symbol,expiration,strike,delta\nSPX,20240621,5400,0.5\n"),
        )
        .mount(&mock_server)
        .await;

    let config_dir = temp_dir.path().join(".config").join("harvester");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        format!(
            "max_retries = 3\nlease_timeout_secs = 600\napi_base_url = \"{}\"\nreport_interval_secs = 0\n",
            mock_server.uri()
        ),
    )
    .unwrap();

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "enqueue"])
        .args(["SPX,2024-06-21,2024-06-20", "SPX,2024-06-21,2024-06-18"])
        .assert()
        .success();

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "work", "--exit-when-drained", "-w", "2"])
        .args(["-o", &data_dir.to_string_lossy()])
        .assert()
        .success();

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"completed\": 2"));

    assert!(
        data_dir
            .join("SPX/2024/06/SPX_20240621_20240620_5s.csv")
            .is_file()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_enqueue_discover_lists_terminal_dates_in_window() {
    let temp_dir = TempDir::new().unwrap();
    let db = db_arg(&temp_dir);

    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/option/list/expirations"))
        .and(query_param("symbol", "SPXW"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("symbol,expiration\nSPXW,20240531\nSPXW,20240621\n"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/option/list/dates/quote"))
        .and(query_param("expiration", "20240621"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("date\n20240612\n20240618\n20240620\n"),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let run = |expected: &'static str| {
        harvester(temp_dir.path())
            .args(["-q", "--db", &db, "enqueue", "--discover", "spxw"])
            .args(["--from", "2024-06-15", "--api-base-url", &mock_server.uri()])
            .assert()
            .success()
            .stdout(predicate::str::contains("Discovered 2 task(s)"))
            .stdout(predicate::str::contains(expected));
    };
    run("Enqueued 2 task(s), 0 already present");
    run("Enqueued 0 task(s), 2 already present");

    harvester(temp_dir.path())
        .args(["-q", "--db", &db, "status", "--list", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SPXW 2024-06-21 2024-06-18"))
        .stdout(predicate::str::contains("SPXW 2024-06-21 2024-06-20"))
        .stdout(predicate::str::contains("2024-06-12").not());
}
