use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn top_level_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("stockyardctl");
    let out = cmd.arg("--help").assert().success().get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out);
    for sub in ["simulate", "plan", "send", "config"] {
        assert!(text.contains(sub), "help missing '{sub}'");
    }
}

#[test]
fn simulate_help_documents_task_syntax() {
    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.args(["simulate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--task"))
        .stdout(predicate::str::contains("--stored"))
        .stdout(predicate::str::contains("--step-ms"));
}

#[test]
fn plan_compacts_into_leading_cells() {
    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.env_remove("STOCKYARD_CONFIG_PATH")
        .env_remove("STOCKYARD_CONFIG_JSON")
        .args(["plan", "--stored", "A@1:1", "--stored", "B@2:3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("move B R2C3 -> R1C2"))
        .stdout(predicate::str::contains("1 move(s)"));
}

#[test]
fn plan_with_targets_goes_through_a_buffer() {
    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.env_remove("STOCKYARD_CONFIG_PATH")
        .env_remove("STOCKYARD_CONFIG_JSON")
        .args([
            "plan", "--stored", "A@1:1", "--stored", "C@1:2", "--stored", "B@2:3",
            "--target", "A@1:1", "--target", "B@1:2", "--target", "C@1:3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("(buffer)"))
        .stdout(predicate::str::contains("3 move(s)"));
}

#[test]
fn plan_on_a_full_grid_fails() {
    let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(file, "[engine.grid]\nrows = 1\ncols = 2").unwrap();

    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.arg("--config")
        .arg(file.path())
        .args(["plan", "--stored", "A@1:1", "--stored", "B@1:2"])
        .args(["--target", "B@1:1", "--target", "A@1:2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("full"));
}

#[test]
fn config_prints_source_and_toml() {
    let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(file, "[engine.grid]\nrows = 2\ncols = 5").unwrap();

    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.arg("--config")
        .arg(file.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("# source:"))
        .stdout(predicate::str::contains("[engine"))
        .stdout(predicate::str::contains("cols = 5"));
}

#[test]
fn simulate_runs_a_reorganize_to_completion() {
    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.env_remove("STOCKYARD_CONFIG_PATH")
        .env_remove("STOCKYARD_CONFIG_JSON")
        .args(["simulate", "--stored", "1:1", "--stored", "2:3"])
        .args(["--task", "organize", "--step-ms", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED REORGANIZE_WAREHOUSE"))
        .stdout(predicate::str::contains("R1 X X . ."));
}

#[test]
fn send_goes_to_the_simulator_by_default() {
    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.env_remove("STOCKYARD_CONFIG_PATH")
        .env_remove("STOCKYARD_CONFIG_JSON")
        .args(["send", "TAKE", "2", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));

    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.env_remove("STOCKYARD_CONFIG_PATH")
        .env_remove("STOCKYARD_CONFIG_JSON")
        .args(["send", "DANCE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("did not accept `DANCE`"));
}

#[test]
fn send_uses_the_configured_http_controller() {
    let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(
        file,
        "[device]\ntransport = \"http\"\nbase_url = \"http://127.0.0.1:9/\"\n\n[engine.device]\ncommand_timeout_ms = 500"
    )
    .unwrap();

    let mut cmd = cargo_bin_cmd!("stockyardctl");
    cmd.arg("--config")
        .arg(file.path())
        .args(["send", "HOME"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("device unreachable"));
}
