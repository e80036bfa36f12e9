#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use tempfile::tempdir;

fn spichr(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("spichr").expect("spichr binary");
    cmd.env("SPICHR_DATA_DIR", data_dir)
        .env("SPICHR_TZ", "UTC")
        .env("SPICHR_LOG", "spichr=warn");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().expect("run spichr");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("utf8 stdout")
}

#[test]
fn add_list_and_status_round_trip_through_the_data_dir() -> Result<()> {
    let dir = tempdir()?;

    let id = stdout_of(spichr(dir.path()).args(["items", "add", "Milk", "--expires", "2099-01-01"]));
    let id = id.trim().to_string();
    assert_eq!(id.len(), 36);
    stdout_of(spichr(dir.path()).args(["items", "add", "Coffee", "--shopping"]));

    let listing = stdout_of(spichr(dir.path()).args(["items", "list"]));
    assert!(listing.contains("Milk"));
    assert!(listing.contains("Coffee"));

    let status = stdout_of(spichr(dir.path()).args(["status", "--json"]));
    let value: serde_json::Value = serde_json::from_str(&status)?;
    assert_eq!(value["in_stock"], 1);
    assert_eq!(value["shopping_list"], 1);

    let opened = stdout_of(spichr(dir.path()).args(["items", "open", &id, "--days", "3"]));
    assert!(opened.contains("warning"));

    assert!(dir.path().join("spichr.sqlite3").exists());
    assert!(dir.path().join("preferences.json").exists());
    Ok(())
}

#[test]
fn household_id_is_stable_across_runs() -> Result<()> {
    let dir = tempdir()?;
    let first = stdout_of(spichr(dir.path()).args(["household", "show", "--json"]));
    let second = stdout_of(spichr(dir.path()).args(["household", "show", "--json"]));
    let a: serde_json::Value = serde_json::from_str(&first)?;
    let b: serde_json::Value = serde_json::from_str(&second)?;
    assert!(a["household_id"].is_string());
    assert_eq!(a["household_id"], b["household_id"]);
    assert_eq!(a["sharing"]["is_shared"], false);
    Ok(())
}

#[test]
fn deleting_an_unknown_item_exits_with_two() -> Result<()> {
    let dir = tempdir()?;
    spichr(dir.path())
        .args(["items", "delete", "0192d2f4-0000-7000-8000-000000000000"])
        .assert()
        .code(2);
    Ok(())
}

#[test]
fn bad_ids_are_rejected_by_the_parser() -> Result<()> {
    let dir = tempdir()?;
    spichr(dir.path())
        .args(["items", "stock", "not-a-uuid"])
        .assert()
        .failure();
    Ok(())
}
