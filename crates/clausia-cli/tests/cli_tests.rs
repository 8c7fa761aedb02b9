//! Integration tests for the clausia CLI
//!
//! These tests invoke the actual clausia binary against a temporary ledger
//! file and verify:
//! - Exit codes (0 = success, 1 = rejected transaction, 2 = error)
//! - JSON output on stdout
//! - Ledger state persisting across invocations

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

// ── Helpers ───────────────────────────────────────────────

fn clausia_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_clausia"))
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Workspace {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    fn ledger(&self) -> PathBuf {
        self.dir.path().join("ledger.json")
    }

    fn run(&self, args: &[&str]) -> Output {
        run_with_ledger(&self.ledger(), args)
    }

    /// Run with `--json` and parse stdout
    fn json(&self, args: &[&str]) -> (i32, Value) {
        let mut full = vec!["--json"];
        full.extend_from_slice(args);
        let output = self.run(&full);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let value = serde_json::from_str(&stdout).unwrap_or(Value::Null);
        (output.status.code().unwrap_or(-1), value)
    }

    /// Run a command that must succeed and return its JSON
    fn ok(&self, args: &[&str]) -> Value {
        let (code, value) = self.json(args);
        assert_eq!(code, 0, "command {:?} failed: {}", args, value);
        value
    }

    fn key_of(value: &Value) -> String {
        value["@key"].as_str().expect("record has a key").to_string()
    }

    /// A user and a contract owned by it
    fn contract(&self) -> String {
        let user = self.ok(&["create-user", "--id", "owner", "--name", "Olivia"]);
        let owner = Self::key_of(&user);
        let contract = self.ok(&[
            "create-contract",
            "--name",
            "Supply agreement",
            "--owner",
            &owner,
            "--signature-date",
            "2024-01-01",
        ]);
        Self::key_of(&contract)
    }
}

fn run_with_ledger(ledger: &Path, args: &[&str]) -> Output {
    Command::new(clausia_bin())
        .arg("--ledger")
        .arg(ledger)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute clausia")
}

// ── Version ───────────────────────────────────────────────

#[test]
fn test_version_command() {
    let ws = Workspace::new();
    let output = ws.run(&["version"]);
    assert!(output.status.success(), "version should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("clausia"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    assert!(!ws.ledger().exists(), "version must not touch the ledger");
}

#[test]
fn test_version_flag() {
    let output = Command::new(clausia_bin())
        .arg("--version")
        .output()
        .expect("failed to execute clausia");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_actions_lists_every_type() {
    let ws = Workspace::new();
    let actions = ws.ok(&["actions"]);
    let names: Vec<&str> = actions
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 6);
    assert!(names.contains(&"paymentProcessing"));
    assert!(names.contains(&"nonExecutable"));
}

// ── Contracts ─────────────────────────────────────────────

#[test]
fn test_create_contract_persists() {
    let ws = Workspace::new();
    let key = ws.contract();
    assert!(ws.ledger().exists());

    let shown = ws.ok(&["show", &key]);
    assert_eq!(shown["name"], "Supply agreement");
    assert_eq!(shown["dates"]["signature"], "2024-01-01T00:00:00Z");
}

#[test]
fn test_create_contract_unknown_owner_is_rejected() {
    let ws = Workspace::new();
    let (code, body) = ws.json(&[
        "create-contract",
        "--name",
        "x",
        "--owner",
        "user:ghost",
        "--signature-date",
        "2024-01-01",
    ]);
    assert_eq!(code, 1);
    assert_eq!(body["status"], 404);
}

#[test]
fn test_duplicate_user_conflicts() {
    let ws = Workspace::new();
    ws.ok(&["create-user", "--id", "ana", "--name", "Ana"]);
    let (code, body) = ws.json(&["create-user", "--id", "ana", "--name", "Ana"]);
    assert_eq!(code, 1);
    assert_eq!(body["status"], 409);
}

// ── Execution ─────────────────────────────────────────────

#[test]
fn test_fine_clause_end_to_end() {
    let ws = Workspace::new();
    let contract = ws.contract();

    let clause = ws.ok(&[
        "add-clause",
        "--contract",
        &contract,
        "--id",
        "late-fee",
        "--action-type",
        "fineCalculation",
    ]);
    let clause_key = Workspace::key_of(&clause);
    assert_eq!(ws.ok(&["executable"]).as_array().unwrap().len(), 1);

    ws.ok(&[
        "add-fine-inputs",
        "--clause",
        &clause_key,
        "--reference-value",
        "1000",
        "--daily-percentage",
        "1",
        "--days",
        "5",
    ]);

    let report = ws.ok(&["execute", "--contract", &contract]);
    assert_eq!(report["executions"][0]["finalized"], true);
    assert_eq!(report["contract"]["data"]["fine"], 50.0);

    assert!(ws.ok(&["executable"]).as_array().unwrap().is_empty());

    // finalized clauses never run again
    let again = ws.ok(&["execute", "--contract", &contract]);
    assert!(again["executions"].as_array().unwrap().is_empty());
}

#[test]
fn test_date_check_feeds_fine() {
    let ws = Workspace::new();
    let contract = ws.contract();

    let check = ws.ok(&[
        "add-clause",
        "--contract",
        &contract,
        "--id",
        "delivery",
        "--action-type",
        "0",
        "--parameters",
        r#"{"name": "delivery", "intervalType": "days", "deadlineInterval": 10, "direction": "after", "referenceDate": "2024-01-01"}"#,
    ]);
    let check_key = Workspace::key_of(&check);
    ws.ok(&[
        "add-clause",
        "--contract",
        &contract,
        "--id",
        "delivery-fine",
        "--action-type",
        "fineCalculation",
        "--input",
        r#"{"referenceValue": 1000, "dailyPercentage": 1, "referenceClauseDays": true, "referenceClauseName": "delivery"}"#,
        "--depends-on",
        &check_key,
    ]);

    ws.ok(&[
        "add-evaluated-date",
        "--clause",
        &check_key,
        "--date",
        "2024-01-14",
    ]);

    let report = ws.ok(&["execute", "--contract", &contract]);
    let executions = report["executions"].as_array().unwrap();
    assert_eq!(executions[0]["id"], "delivery");
    assert_eq!(executions[1]["id"], "delivery-fine");
    assert_eq!(report["contract"]["data"]["fine"], 30.0);
}

#[test]
fn test_execute_unknown_contract_exit_1() {
    let ws = Workspace::new();
    let (code, body) = ws.json(&["execute", "--contract", "autoExecutableContract:missing"]);
    assert_eq!(code, 1);
    assert_eq!(body["status"], 404);
}

// ── Clause edits ──────────────────────────────────────────

#[test]
fn test_set_dependencies_cycle_rejected() {
    let ws = Workspace::new();
    let contract = ws.contract();
    let a = Workspace::key_of(&ws.ok(&[
        "add-clause",
        "--contract",
        &contract,
        "--id",
        "a",
        "--action-type",
        "fineCalculation",
    ]));
    let b = Workspace::key_of(&ws.ok(&[
        "add-clause",
        "--contract",
        &contract,
        "--id",
        "b",
        "--action-type",
        "fineCalculation",
        "--depends-on",
        &a,
    ]));

    let (code, body) = ws.json(&["set-dependencies", "--clause", &a, "--depends-on", &b]);
    assert_eq!(code, 1);
    assert!(body["error"].as_str().unwrap().contains("cycle"));

    // the rejected edit left nothing behind
    let clause = ws.ok(&["show", &a]);
    assert!(clause["dependencies"].as_array().unwrap().is_empty());
}

#[test]
fn test_remove_clause_records_history() {
    let ws = Workspace::new();
    let contract = ws.contract();
    let clause = Workspace::key_of(&ws.ok(&[
        "add-clause",
        "--contract",
        &contract,
        "--id",
        "note",
        "--action-type",
        "nonExecutable",
    ]));

    let updated = ws.ok(&["remove-clause", "--contract", &contract, "--clause", &clause]);
    assert!(updated["clauses"].as_array().unwrap().is_empty());

    let (code, _) = ws.json(&["show", &clause]);
    assert_eq!(code, 1);
    let history = ws.ok(&["history", &clause]);
    let versions = history.as_array().unwrap();
    assert_eq!(versions.last().unwrap()["@deleted"], true);
}

#[test]
fn test_wrong_action_type_for_typed_input() {
    let ws = Workspace::new();
    let contract = ws.contract();
    let clause = Workspace::key_of(&ws.ok(&[
        "add-clause",
        "--contract",
        &contract,
        "--id",
        "credit",
        "--action-type",
        "creditCalculation",
    ]));
    let (code, body) = ws.json(&["add-evaluated-date", "--clause", &clause, "--date", "2024-01-02"]);
    assert_eq!(code, 1);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Action type is not dateIntervalCheck"));
}

#[test]
fn test_add_clauses_batch() {
    let ws = Workspace::new();
    let contract = ws.contract();
    let batch = r#"[
        {"id": "note", "actionType": "nonExecutable"},
        {"id": "late-fee", "actionType": 1, "input": {"referenceValue": 500, "dailyPercentage": 2, "days": 1}}
    ]"#;
    let updated = ws.ok(&["add-clauses", "--contract", &contract, "--clauses", batch]);
    assert_eq!(updated["clauses"].as_array().unwrap().len(), 2);

    let report = ws.ok(&["execute", "--contract", &contract]);
    assert_eq!(report["contract"]["data"]["fine"], 10.0);

    // one bad entry rejects the whole batch
    let (code, _) = ws.json(&[
        "add-clauses",
        "--contract",
        &contract,
        "--clauses",
        r#"[{"id": "extra", "actionType": 1}, {"id": "", "actionType": 1}]"#,
    ]);
    assert_eq!(code, 1);
    let shown = ws.ok(&["show", &contract]);
    assert_eq!(shown["clauses"].as_array().unwrap().len(), 2);
}

// ── Templates ─────────────────────────────────────────────

#[test]
fn test_template_lifecycle() {
    let ws = Workspace::new();
    let user = ws.ok(&["create-user", "--id", "author", "--name", "Ada"]);
    let author = Workspace::key_of(&user);

    let template = Workspace::key_of(&ws.ok(&[
        "create-template",
        "--id",
        "lease",
        "--name",
        "Lease",
        "--creator",
        &author,
    ]));
    let rent = Workspace::key_of(&ws.ok(&[
        "create-template-clause",
        "--template",
        &template,
        "--id",
        "rent",
        "--action-type",
        "paymentProcessing",
        "--parameters",
        r#"{"name": "rent", "amount": 1200}"#,
    ]));
    ws.ok(&[
        "create-template-clause",
        "--template",
        &template,
        "--id",
        "late-fee",
        "--action-type",
        "fineCalculation",
        "--depends-on",
        &rent,
    ]);

    let edited = ws.ok(&["edit-template", "--template", &template, "--public", "true"]);
    assert_eq!(edited["public"], true);

    let copy = ws.ok(&[
        "duplicate-template",
        "--template",
        &template,
        "--id",
        "lease-2",
        "--name",
        "Lease copy",
    ]);
    assert_eq!(copy["name"], "Lease copy");
    assert_eq!(copy["clauses"].as_array().unwrap().len(), 2);

    let updated = ws.ok(&["delete-template-clause", "--template", &template, "--clause", &rent]);
    assert_eq!(updated["clauses"].as_array().unwrap().len(), 1);

    let deleted = ws.ok(&["delete-template", "--template", &template]);
    assert_eq!(deleted["message"], "Template successfully deleted");
    let (code, _) = ws.json(&["show", &template]);
    assert_eq!(code, 1);

    // the copy survives the original
    let copy_key = Workspace::key_of(&copy);
    let shown = ws.ok(&["show", &copy_key]);
    assert_eq!(shown["clauses"].as_array().unwrap().len(), 2);
}

#[test]
fn test_template_clause_cycle_rejected() {
    let ws = Workspace::new();
    let user = ws.ok(&["create-user", "--id", "author", "--name", "Ada"]);
    let author = Workspace::key_of(&user);
    let template = Workspace::key_of(&ws.ok(&[
        "create-template",
        "--id",
        "t",
        "--name",
        "T",
        "--creator",
        &author,
    ]));
    let a = Workspace::key_of(&ws.ok(&[
        "create-template-clause",
        "--template",
        &template,
        "--id",
        "a",
        "--action-type",
        "1",
    ]));
    let b = Workspace::key_of(&ws.ok(&[
        "create-template-clause",
        "--template",
        &template,
        "--id",
        "b",
        "--action-type",
        "1",
        "--depends-on",
        &a,
    ]));

    let (code, body) = ws.json(&["edit-template-clause", "--clause", &a, "--depends-on", &b]);
    assert_eq!(code, 1);
    assert!(body["error"].as_str().unwrap().contains("cycle"));

    let cleared = ws.ok(&["edit-template-clause", "--clause", &b, "--no-dependencies"]);
    assert!(cleared["dependencies"].as_array().unwrap().is_empty());
}

// ── Cancellation ──────────────────────────────────────────

#[test]
fn test_force_cancel() {
    let ws = Workspace::new();
    let contract = ws.contract();
    let finish = Workspace::key_of(&ws.ok(&[
        "add-clause",
        "--contract",
        &contract,
        "--id",
        "finish",
        "--action-type",
        "contractFinalization",
    ]));

    let (code, _) = ws.json(&["cancel", "--clause", &finish, "--force", "--requested"]);
    assert_eq!(code, 1, "exactly one cancellation flag is accepted");

    let report = ws.ok(&["cancel", "--clause", &finish, "--force"]);
    assert_eq!(report["contract"]["data"]["contractStatus"], "cancelled");
}

// ── Errors ────────────────────────────────────────────────

#[test]
fn test_invalid_json_argument_exit_2() {
    let ws = Workspace::new();
    let output = ws.run(&["add-inputs", "--clause", "clause:x", "--input", "{not json"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_corrupt_ledger_exit_2() {
    let ws = Workspace::new();
    std::fs::write(ws.ledger(), "[]oops").unwrap();
    let output = ws.run(&["executable"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("corrupt"));
}

#[test]
fn test_ledger_from_env() {
    let ws = Workspace::new();
    let output = Command::new(clausia_bin())
        .args(["create-user", "--id", "env", "--name", "Env"])
        .env("CLAUSIA_LEDGER", ws.ledger())
        .output()
        .expect("failed to execute clausia");
    assert!(output.status.success());
    assert!(ws.ledger().exists());
}
