//! Basic CLI tests for the homiebridge command-line interface.

use assert_cmd::Command;
use predicates::prelude::*;

use homiebridge_storage::ProjectionStore;

/// Command running in an empty directory so no stray config.toml is picked up.
fn homiebridge(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("homiebridge").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("HOMIEBRIDGE_DB_PATH")
        .env_remove("HOMIEBRIDGE_BASE_TOPIC")
        .env_remove("RUST_LOG");
    cmd
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let dir = tempfile::tempdir().unwrap();
    homiebridge(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Project Homie MQTT devices"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("devices"))
        .stdout(predicate::str::contains("replay"));
}

/// Test that the CLI shows version information.
#[test]
fn test_cli_version() {
    let dir = tempfile::tempdir().unwrap();
    homiebridge(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("homiebridge"));
}

/// Test that providing no subcommand shows an error.
#[test]
fn test_no_subcommand_shows_error() {
    let dir = tempfile::tempdir().unwrap();
    // Clap's error code for missing required subcommand
    homiebridge(&dir).assert().failure().code(2);
}

#[test]
fn test_devices_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    homiebridge(&dir)
        .args(["--db", "store/homie.redb", "devices"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No devices"));
    assert!(dir.path().join("store/homie.redb").exists());
}

#[test]
fn test_replay_then_list() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("lamp.tsv"),
        "# recorded announcement\n\
         homie/lamp1/$homie\t4.0.0\n\
         homie/lamp1/$name\tKitchen Lamp\n\
         homie/lamp1/$nodes\tonoff\n\
         homie/lamp1/onoff/on/$settable\ttrue\n\
         homie/lamp1/onoff/on\tfalse\n\
         not-homie/x\ty\n\
         homie/lamp1/$state\tready\n",
    )
    .unwrap();

    homiebridge(&dir)
        .args(["--db", "homie.redb", "replay", "lamp.tsv"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Replayed 7 messages: 6 applied, 0 ignored, 1 rejected, 0 failed",
        ));

    homiebridge(&dir)
        .args(["--db", "homie.redb", "devices", "--detail"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 device(s)"))
        .stdout(predicate::str::contains(
            "lamp1  name=Kitchen Lamp  state=ready  homie=4.0.0  nodes=onoff",
        ))
        .stdout(predicate::str::contains("on = false"))
        .stdout(predicate::str::contains("settable=true"));

    homiebridge(&dir)
        .args(["--db", "homie.redb", "devices", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"topic_id\": \"lamp1\""));
}

#[test]
fn test_devices_while_store_is_held() {
    let dir = tempfile::tempdir().unwrap();
    let _running = ProjectionStore::open(dir.path().join("homie.redb")).unwrap();

    homiebridge(&dir)
        .args(["--db", "homie.redb", "devices"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("the bridge is running"));
}

#[test]
fn test_replay_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    homiebridge(&dir)
        .args(["--db", "homie.redb", "replay", "missing.tsv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_explicit_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    homiebridge(&dir)
        .args(["--config", "nope.toml", "devices"])
        .assert()
        .failure();
}
