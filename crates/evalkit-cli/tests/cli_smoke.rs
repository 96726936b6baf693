use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn write_ping_pack(dir: &Path) {
    let pack = dir.join("ping");
    fs::create_dir_all(&pack).unwrap();
    fs::write(
        pack.join("pack.yaml"),
        "id: ping\nname: Ping\nsystem_prompt: Answer briefly.\ngrader:\n  type: contains\n",
    )
    .unwrap();
    fs::write(
        pack.join("cases.yaml"),
        "- id: say-ping\n  prompt: \"Say the word 'ping'\"\n  expected: ping\n- id: say-pong\n  prompt: Say something else\n  expected: ping\n",
    )
    .unwrap();
}

fn evalkit() -> Command {
    let mut cmd = Command::cargo_bin("evalkit").unwrap();
    cmd.env("EVALKIT_LOG", "error")
        .env_remove("OPENAI_API_KEY")
        .env_remove("ANTHROPIC_API_KEY");
    cmd
}

#[test]
fn run_with_fake_model_records_scores() {
    let dir = tempfile::tempdir().unwrap();
    write_ping_pack(dir.path());
    let db = dir.path().join("out").join("results.sqlite");

    evalkit()
        .args(["run", "--pack", "ping", "--model", "fake:echo", "--n", "2"])
        .arg("--dir")
        .arg(dir.path())
        .arg("--out")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("Running pack 'Ping' with 2 cases, n=2"))
        .stdout(predicate::str::contains("Completed. Run IDs:"));

    let conn = rusqlite::Connection::open(&db).unwrap();
    let outputs: i64 = conn
        .query_row("SELECT COUNT(*) FROM outputs", [], |r| r.get(0))
        .unwrap();
    assert_eq!(outputs, 4);
    let passes: i64 = conn
        .query_row("SELECT COUNT(*) FROM scores WHERE label = 'PASS'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(passes, 2);
    let model: String = conn
        .query_row("SELECT model_id FROM runs", [], |r| r.get(0))
        .unwrap();
    assert_eq!(model, "fake:echo");
}

#[test]
fn export_and_regrade_latest_run() {
    let dir = tempfile::tempdir().unwrap();
    write_ping_pack(dir.path());
    let db = dir.path().join("results.sqlite");

    evalkit()
        .args(["run", "--pack", "ping", "--model", "fake:echo"])
        .arg("--dir")
        .arg(dir.path())
        .arg("--out")
        .arg(&db)
        .assert()
        .success();

    let out = evalkit()
        .arg("export")
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["case_id"], "say-ping");
    assert_eq!(rows[0]["label"], "PASS");
    assert_eq!(rows[1]["label"], "FAIL");

    let csv_path = dir.path().join("results.csv");
    evalkit()
        .args(["export", "--format", "csv"])
        .arg("--db")
        .arg(&db)
        .arg("--out")
        .arg(&csv_path)
        .assert()
        .success();
    let csv_text = std::fs::read_to_string(&csv_path).unwrap();
    let mut lines = csv_text.lines();
    assert!(lines.next().unwrap().starts_with("output_id,case_id,"));
    assert_eq!(lines.filter(|l| l.contains("PASS") || l.contains("FAIL")).count(), 2);

    evalkit()
        .args(["regrade", "--pack", "ping"])
        .arg("--dir")
        .arg(dir.path())
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"updated\": 2"))
        .stdout(predicate::str::contains("\"inserted\": 0"));

    let conn = rusqlite::Connection::open(&db).unwrap();
    let scores: i64 = conn
        .query_row("SELECT COUNT(*) FROM scores", [], |r| r.get(0))
        .unwrap();
    assert_eq!(scores, 2);
}

#[test]
fn list_packs_shows_case_counts() {
    let dir = tempfile::tempdir().unwrap();
    write_ping_pack(dir.path());

    evalkit()
        .arg("list-packs")
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Ping (2 cases)"));

    let empty = tempfile::tempdir().unwrap();
    evalkit()
        .arg("list-packs")
        .arg("--dir")
        .arg(empty.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No packs found."));
}

#[test]
fn configuration_problems_exit_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write_ping_pack(dir.path());

    evalkit()
        .args(["run", "--pack", "ping", "--model", "gpt-4o"])
        .arg("--dir")
        .arg(dir.path())
        .arg("--out")
        .arg(dir.path().join("r.sqlite"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid model spec"));

    evalkit()
        .args(["run", "--pack", "ping", "--model", "openai:gpt-4o-mini"])
        .arg("--dir")
        .arg(dir.path())
        .arg("--out")
        .arg(dir.path().join("r.sqlite"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("OPENAI_API_KEY"));

    evalkit()
        .args(["run", "--pack", "missing", "--model", "fake:m"])
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("pack config not found"));

    evalkit()
        .arg("export")
        .arg("--db")
        .arg(dir.path().join("nope.sqlite"))
        .assert()
        .code(2);
}

#[test]
fn version_prints_package_version() {
    evalkit()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
