
use assert_cmd::prelude::*;
use cli_helpers::{base_cmd, db_path, fixture, run_json, settle};
use predicates::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tempfile::TempDir;

fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimals serialize as strings")
        .parse()
        .expect("valid decimal")
}

fn setup_temp_home() -> TempDir {
    TempDir::new().expect("failed to create temp home")
}

#[test]
fn positions_empty_db_no_color_when_piped() {
    let home = setup_temp_home();

    base_cmd(&home)
        .arg("positions")
        .assert()
        .success()
        .stdout(predicate::str::contains("No positions found"))
        .stdout(predicate::str::contains("\u{001b}[").not());
}

#[test]
fn settle_dry_run_does_not_create_db() {
    let home = setup_temp_home();
    let db = db_path(&home);
    assert!(!db.exists(), "db should start absent");

    base_cmd(&home)
        .arg("settle")
        .arg(fixture("buy_invoice.json"))
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("previewed"))
        .stdout(predicate::str::contains("ABCD3"))
        .stdout(predicate::str::contains("Dry run"));

    assert!(!db.exists(), "dry run must not create the ledger");
}

#[test]
fn settle_buy_and_sell_updates_positions() {
    let home = setup_temp_home();
    settle(&home, "buy_invoice.json").expect("buy settles");

    base_cmd(&home)
        .arg("settle")
        .arg(fixture("sell_invoice.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Sales"))
        .stdout(predicate::str::contains("R$ 79,88"));

    base_cmd(&home)
        .args(["positions", "--investor", "investor-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ABCD3"))
        .stdout(predicate::str::contains("60,00"))
        .stdout(predicate::str::contains("R$ 600,18"));

    base_cmd(&home)
        .args(["batch", "investor-1", "2025-03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("03/2025"))
        .stdout(predicate::str::contains("exempt"));

    base_cmd(&home)
        .args(["darf", "investor-1", "2025-03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nenhum DARF"));
}

#[test]
fn settle_same_invoice_twice_is_skipped() {
    let home = setup_temp_home();
    settle(&home, "buy_invoice.json").expect("first run settles");

    base_cmd(&home)
        .arg("settle")
        .arg(fixture("buy_invoice.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("already settled"));

    let positions = run_json(&home, &["positions"]).expect("positions json");
    let positions = positions.as_array().expect("array");
    assert_eq!(positions.len(), 1);
    assert_eq!(decimal(&positions[0]["quantity"]), dec!(100));
}

#[test]
fn settle_reformatted_copy_is_skipped() {
    let home = setup_temp_home();
    settle(&home, "buy_invoice.json").expect("first run settles");

    base_cmd(&home)
        .arg("settle")
        .arg(fixture("buy_invoice_reformatted.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("already settled"));

    let positions = run_json(&home, &["positions"]).expect("positions json");
    assert_eq!(decimal(&positions[0]["quantity"]), dec!(100));
    assert_eq!(decimal(&positions[0]["total_cost"]), dec!(1000.30));
}

#[test]
fn settle_json_output() {
    let home = setup_temp_home();
    let path = fixture("buy_invoice.json");
    let settled = run_json(&home, &["settle", &path.to_string_lossy()]).expect("settle json");

    assert_eq!(settled["status"], "processed");
    assert_eq!(decimal(&settled["item_batches"][0]["total_taxes"]), dec!(0.30));
    assert_eq!(settled["lines"][0]["security"], "ABCD3");
}

#[test]
fn earnings_are_recorded_once() {
    let home = setup_temp_home();

    base_cmd(&home)
        .arg("earnings")
        .arg(fixture("earnings.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("2 recorded, 0 already on file"))
        .stdout(predicate::str::contains("JCP"));

    base_cmd(&home)
        .arg("earnings")
        .arg(fixture("earnings.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("0 recorded, 2 already on file"));
}

#[test]
fn batch_rejects_malformed_month() {
    let home = setup_temp_home();

    base_cmd(&home)
        .args(["batch", "investor-1", "2025-13"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected YYYY-MM"));
}

#[test]
fn init_creates_ledger_at_explicit_path() {
    let home = setup_temp_home();
    let db = home.path().join("custom").join("books.db");
    std::fs::create_dir_all(db.parent().expect("parent")).expect("mkdir");

    base_cmd(&home)
        .arg("--db")
        .arg(&db)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ledger ready"));

    assert!(db.exists());
}

#[test]
fn explicit_config_must_exist() {
    let home = setup_temp_home();

    base_cmd(&home)
        .args(["--config", "/nonexistent/nota.toml", "positions"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration"));
}
