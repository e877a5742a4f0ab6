use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

const PAYROLL: &str = "Matricule,Employé,Date de paie,Code de paie,Montant,Part employeur\n\
2093,Tremblay Marie,2025-08-28,101,1500.00,\n\
2094,Roy Luc,2025-08-28,101,-250.00,\n\
2095,Côté Ana,2025-08-28,101,3000.00,\n";

fn paie(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("paie").unwrap();
    cmd.arg("--db")
        .arg(db)
        .env_remove("PAYROLL_DSN")
        .env_remove("PAYROLL_ALLOW_REIMPORT")
        .env_remove("APP_ENV");
    cmd
}

fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("paie.db");
    let file = dir.path().join("paie_2025-08-28.csv");
    std::fs::write(&file, PAYROLL).unwrap();
    paie(&db).arg("init").assert().success();
    (dir, db, file)
}

fn import(db: &Path, file: &Path) -> assert_cmd::assert::Assert {
    paie(db)
        .args(["import"])
        .arg(file)
        .args(["--pay-date", "2025-08-28", "--user", "tester"])
        .assert()
}

#[test]
fn test_init_creates_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("nested").join("paie.db");
    paie(&db)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Database ready"));
    assert!(db.exists());
}

#[test]
fn test_import_then_duplicate() {
    let (_dir, db, file) = setup();
    import(&db, &file)
        .success()
        .stdout(predicate::str::contains("3 ligne(s) importée(s)"));
    import(&db, &file)
        .failure()
        .stderr(predicate::str::contains("déjà été importé"))
        .stderr(predicate::str::contains("Solution:"));
}

#[test]
fn test_import_json_outcome() {
    let (_dir, db, file) = setup();
    let out = paie(&db)
        .arg("import")
        .arg(&file)
        .args(["--pay-date", "2025-08-28", "--user", "tester", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["rows_count"], 3);
    assert_eq!(json["period"], "2025-08");
    assert_eq!(json["kpi"]["cards"]["nb_employes"], 3);
}

#[test]
fn test_import_missing_file_fails() {
    let (dir, db, _file) = setup();
    import(&db, &dir.path().join("absent.csv"))
        .failure()
        .stderr(predicate::str::contains("n'existe plus"));
}

#[test]
fn test_import_requires_initialized_database() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("p.csv");
    std::fs::write(&file, PAYROLL).unwrap();
    import(&dir.path().join("never.db"), &file)
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_kpi_show_and_list() {
    let (_dir, db, file) = setup();
    import(&db, &file).success();
    paie(&db)
        .args(["kpi", "show", "2025-08-28", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"source\": \"snapshot\""))
        .stdout(predicate::str::contains("\"salaire_net_total\": 4250.0"));
    paie(&db)
        .args(["kpi", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2025-08-28"));
    paie(&db)
        .args(["kpi", "recompute", "2025-08-28"])
        .assert()
        .success();
}

#[test]
fn test_closed_period_refuses_import() {
    let (_dir, db, file) = setup();
    import(&db, &file).success();
    paie(&db).args(["periods", "close", "2025-08-28"]).assert().success();
    paie(&db)
        .args(["periods", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("closed"));

    let other = file.with_file_name("second.csv");
    std::fs::write(&other, PAYROLL.replace("1500.00", "1600.00")).unwrap();
    import(&db, &other)
        .failure()
        .stderr(predicate::str::contains("déjà fermée"));
}

#[test]
fn test_delete_period_refused_in_production() {
    let (_dir, db, file) = setup();
    import(&db, &file).success();
    paie(&db)
        .env("APP_ENV", "production")
        .args(["periods", "delete", "2025-08-28"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("production"));
    paie(&db)
        .args(["periods", "delete", "2025-08-28"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 transactions"));
    paie(&db)
        .args(["employees", "prune-orphans"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 orphan"));
}

#[test]
fn test_sign_policy_set_and_list() {
    let (_dir, db, _file) = setup();
    paie(&db)
        .args(["sign-policy", "set", "610", "--employee", "-1", "--employer", "1"])
        .assert()
        .success();
    paie(&db)
        .args(["sign-policy", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("610"))
        .stdout(predicate::str::contains("-1"));
    paie(&db)
        .args(["sign-policy", "set", "611", "--employee", "2", "--employer", "1"])
        .assert()
        .failure();
}

#[test]
fn test_status_reports_counts() {
    let (_dir, db, file) = setup();
    import(&db, &file).success();
    paie(&db)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Transactions:  3"));
}

#[test]
fn test_status_lists_recent_imports() {
    let (dir, db, file) = setup();
    import(&db, &file).success();
    import(&db, &dir.path().join("absent.csv")).failure();
    paie(&db)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Recent imports"))
        .stdout(predicate::str::contains("paie_2025-08-28.csv"))
        .stdout(predicate::str::contains("error (FILE_NOT_FOUND)"));
}
