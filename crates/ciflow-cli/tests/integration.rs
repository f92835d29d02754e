#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn ciflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ciflow").unwrap();
    cmd.current_dir(dir.path()).env("CIFLOW_ROOT", dir.path());
    cmd
}

fn init_project(dir: &TempDir) {
    ciflow(dir).arg("init").assert().success();
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.output().unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

fn git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(["-c", "user.name=ci", "-c", "user.email=ci@example.com"])
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?}");
}

// ---------------------------------------------------------------------------
// ciflow init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_config_workflow_and_action() {
    let dir = TempDir::new().unwrap();
    ciflow(&dir).arg("init").assert().success();

    assert!(dir.path().join(".ciflow/config.yaml").exists());
    assert!(dir.path().join(".github/workflows/ci.yml").exists());
    assert!(dir.path().join(".github/workflows/setup/action.yml").exists());

    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(gitignore.contains(".ciflow/work/"));
    assert!(gitignore.contains(".ciflow/runs/"));
}

#[test]
fn init_is_idempotent_and_keeps_edits() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let workflow = dir.path().join(".github/workflows/ci.yml");
    std::fs::write(&workflow, "# edited\n").unwrap();

    ciflow(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .github/workflows/ci.yml"));
    assert_eq!(std::fs::read_to_string(&workflow).unwrap(), "# edited\n");
}

// ---------------------------------------------------------------------------
// ciflow validate
// ---------------------------------------------------------------------------

#[test]
fn default_workflow_validates() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ciflow(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (4 jobs)"));
}

#[test]
fn validate_reports_missing_setup_action() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    std::fs::remove_file(dir.path().join(".github/workflows/setup/action.yml")).unwrap();

    ciflow(&dir)
        .arg("validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("composite action not found"));
}

#[test]
fn validate_without_workflow_fails() {
    let dir = TempDir::new().unwrap();
    ciflow(&dir)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("workflow not found"));
}

// ---------------------------------------------------------------------------
// ciflow plan
// ---------------------------------------------------------------------------

#[test]
fn plan_push_to_master_has_four_jobs() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let plan = json_stdout(ciflow(&dir).args(["plan", "--json"]));
    assert_eq!(plan["triggered"], true);
    let ids: Vec<_> = plan["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["test-3-11-4-2", "coverage", "docs", "lint"]);

    let test = &plan["jobs"][0];
    assert_eq!(test["matrix"]["python-version"], "3.11");
    assert_eq!(test["steps"][1]["kind"]["inputs"]["django-version"], "4.2.*");
    assert_eq!(test["steps"][2]["kind"]["run"], "make test");
}

#[test]
fn plan_pull_request_to_master_is_triggered() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let plan = json_stdout(ciflow(&dir).args(["plan", "--event", "pull_request", "--json"]));
    assert_eq!(plan["triggered"], true);
    assert_eq!(plan["jobs"].as_array().unwrap().len(), 4);
}

#[test]
fn plan_other_branch_runs_nothing() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ciflow(&dir)
        .args(["plan", "--branch", "develop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is not triggered by push on 'develop'"));
}

#[test]
fn plan_single_job() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let plan = json_stdout(ciflow(&dir).args(["plan", "--job", "lint", "--json"]));
    let jobs = plan["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], "lint");
}

#[test]
fn plan_unknown_job_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ciflow(&dir)
        .args(["plan", "--job", "deploy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("job not found: deploy"));
}

#[test]
fn plan_unknown_event_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ciflow(&dir)
        .args(["plan", "--event", "schedule"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown event 'schedule'"));
}

// ---------------------------------------------------------------------------
// ciflow config / runs
// ---------------------------------------------------------------------------

#[test]
fn config_show_has_defaults() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let config = json_stdout(ciflow(&dir).args(["config", "show", "--json"]));
    assert_eq!(config["runner"]["shell"], "bash");
    assert_eq!(config["coverage"]["endpoint"], "https://coveralls.io/api/v1/jobs");
}

#[test]
fn config_validate_after_init() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ciflow(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn runs_list_starts_empty() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ciflow(&dir)
        .args(["runs", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded."));
}

#[test]
fn runs_show_unknown_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ciflow(&dir)
        .args(["runs", "show", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run not found: abc"));
}

#[test]
fn runs_show_rejects_path_like_ids() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ciflow(&dir)
        .args(["runs", "show", "../../etc/passwd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid run id"));
}

// ---------------------------------------------------------------------------
// ciflow run
// ---------------------------------------------------------------------------

const ACTION: &str = "name: setup\nruns:\n  using: composite\n  steps:\n    - shell: sh\n      run: echo ready > .setup-done\n";

fn runnable_project(commands: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let mut workflow = String::from("on:\n  push:\n    branches: [master]\njobs:\n");
    for (job, run) in commands {
        workflow.push_str(&format!(
            "  {job}:\n    steps:\n      - uses: actions/checkout@v4\n      - uses: ./.github/workflows/setup\n      - run: {run}\n        shell: sh\n"
        ));
    }
    std::fs::create_dir_all(dir.path().join(".github/workflows/setup")).unwrap();
    std::fs::write(dir.path().join(".github/workflows/ci.yml"), workflow).unwrap();
    std::fs::write(
        dir.path().join(".github/workflows/setup/action.yml"),
        ACTION,
    )
    .unwrap();
    git(dir.path(), &["init", "--quiet"]);
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "--quiet", "-m", "init"]);
    dir
}

#[test]
fn run_records_successful_jobs() {
    let dir = runnable_project(&[("docs", "test -f .setup-done"), ("lint", "echo lint")]);

    let report = json_stdout(ciflow(&dir).args(["run", "--json"]));
    let jobs = report["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j["status"] == "success"));

    let runs = json_stdout(ciflow(&dir).args(["runs", "list", "--json"]));
    assert_eq!(runs.as_array().unwrap().len(), 1);
    assert_eq!(runs[0]["id"], report["id"]);
}

#[test]
fn run_exits_non_zero_when_a_job_fails() {
    let dir = runnable_project(&[("docs", "echo docs"), ("lint", "exit 4")]);

    ciflow(&dir)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 of 2 job(s) failed"));

    let runs = json_stdout(ciflow(&dir).args(["runs", "list", "--json"]));
    let id = runs[0]["id"].as_str().unwrap().to_string();
    let report = json_stdout(ciflow(&dir).args(["runs", "show", &id[..8], "--json"]));
    let lint = report["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .find(|j| j["id"] == "lint")
        .unwrap();
    assert_eq!(lint["status"], "failed");
    assert_eq!(lint["steps"][2]["exit_code"], 4);
}

#[test]
fn run_on_untriggered_branch_does_nothing() {
    let dir = runnable_project(&[("lint", "echo lint")]);

    ciflow(&dir)
        .args(["run", "--branch", "feature/x"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is not triggered"));
    assert!(!dir.path().join(".ciflow/runs").exists());
}
