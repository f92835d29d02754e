use std::collections::BTreeMap;
use std::path::PathBuf;

use futures::future::BoxFuture;

use ciflow_core::plan::{JobInstance, PlannedStep};
use ciflow_core::record::StepFailure;
use ciflow_core::trigger::Trigger;

use crate::{Result, RunnerError};

// ─── StepOutcome ──────────────────────────────────────────────────────────

/// What a successful step leaves behind for the report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub exit_code: Option<i32>,
    /// Non-fatal problems, e.g. a coverage upload failing with
    /// `fail-on-error: false`.
    pub warnings: Vec<String>,
}

impl StepOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

pub type StepResult = std::result::Result<StepOutcome, StepFailure>;

// ─── JobEnv ───────────────────────────────────────────────────────────────

/// Everything one job instance owns while it runs. Never shared between jobs.
#[derive(Debug, Clone)]
pub struct JobEnv {
    /// Job instance id.
    pub job: String,
    /// Directory holding the workspace and the runner's command files.
    pub dir: PathBuf,
    /// The checked-out repository; `GITHUB_WORKSPACE`.
    pub workspace: PathBuf,
    pub trigger: Trigger,
    /// Variables given to every step.
    pub vars: BTreeMap<String, String>,
    /// Entries prepended to `PATH`, in the order they were added.
    pub path: Vec<PathBuf>,
}

impl JobEnv {
    pub fn new(job: &JobInstance, trigger: &Trigger, dir: PathBuf) -> Self {
        let workspace = dir.join("workspace");
        let mut env = Self {
            job: job.id.clone(),
            workspace,
            trigger: trigger.clone(),
            vars: BTreeMap::new(),
            path: Vec::new(),
            dir,
        };

        let defaults = [
            ("CI", "true".to_string()),
            ("GITHUB_ACTIONS", "false".to_string()),
            ("GITHUB_WORKSPACE", env.workspace.display().to_string()),
            ("GITHUB_SHA", trigger.revision().to_string()),
            ("GITHUB_REF_NAME", trigger.branch.clone()),
            ("GITHUB_EVENT_NAME", trigger.event.as_str().to_string()),
            ("GITHUB_PATH", env.github_path_file().display().to_string()),
            ("GITHUB_ENV", env.github_env_file().display().to_string()),
            ("CIFLOW_JOB", job.id.clone()),
        ];
        for (k, v) in defaults {
            env.vars.insert(k.to_string(), v);
        }
        env.vars
            .extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    pub fn github_path_file(&self) -> PathBuf {
        self.dir.join("github_path")
    }

    pub fn github_env_file(&self) -> PathBuf {
        self.dir.join("github_env")
    }

    /// The full environment for one process: job variables, then `step_env`,
    /// then `PATH` with the job's additions in front (newest first).
    pub fn process_env(&self, step_env: &BTreeMap<String, String>) -> Result<Vec<(String, String)>> {
        let mut merged = self.vars.clone();
        merged.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));

        if !self.path.is_empty() {
            let host = std::env::var_os("PATH").unwrap_or_default();
            let entries = self
                .path
                .iter()
                .rev()
                .cloned()
                .chain(std::env::split_paths(&host));
            let joined = std::env::join_paths(entries)
                .map_err(|e| RunnerError::Process(format!("invalid PATH entry: {e}")))?;
            merged.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }

        Ok(merged.into_iter().collect())
    }

    /// Empty the `GITHUB_PATH` / `GITHUB_ENV` files before a process runs.
    pub fn reset_command_files(&self) -> Result<()> {
        std::fs::write(self.github_path_file(), "")?;
        std::fs::write(self.github_env_file(), "")?;
        Ok(())
    }

    /// Apply whatever the last process wrote to `GITHUB_PATH` / `GITHUB_ENV`.
    pub fn absorb_command_files(&mut self) -> Result<()> {
        if let Ok(text) = std::fs::read_to_string(self.github_path_file()) {
            for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                tracing::debug!(job = %self.job, "PATH += {line}");
                self.path.push(PathBuf::from(line));
            }
        }
        if let Ok(text) = std::fs::read_to_string(self.github_env_file()) {
            for (k, v) in parse_env_file(&text) {
                tracing::debug!(job = %self.job, "env {k} set");
                self.vars.insert(k, v);
            }
        }
        Ok(())
    }
}

/// Parse `GITHUB_ENV` content: `NAME=value` lines and `NAME<<DELIM` blocks.
pub fn parse_env_file(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some((name, delim)) = line.split_once("<<") {
            let mut value = Vec::new();
            for body in lines.by_ref() {
                if body == delim {
                    break;
                }
                value.push(body);
            }
            out.push((name.trim().to_string(), value.join("\n")));
        } else if let Some((name, value)) = line.split_once('=') {
            out.push((name.trim().to_string(), value.to_string()));
        }
    }
    out
}

// ─── StepExecutor ─────────────────────────────────────────────────────────

/// The capabilities a job needs. The orchestrator sequences them; an
/// implementation only knows how to perform each one.
pub trait StepExecutor: Send + Sync {
    /// Create the job's isolated workspace.
    fn prepare<'a>(
        &'a self,
        run_id: &'a str,
        job: &'a JobInstance,
        trigger: &'a Trigger,
    ) -> BoxFuture<'a, Result<JobEnv>>;

    /// Clone the repository into the workspace at the triggering revision.
    fn checkout<'a>(&'a self, env: &'a mut JobEnv, step: &'a PlannedStep)
        -> BoxFuture<'a, StepResult>;

    /// Run a local composite action.
    fn setup<'a>(&'a self, env: &'a mut JobEnv, step: &'a PlannedStep) -> BoxFuture<'a, StepResult>;

    /// Run a `run:` step.
    fn command<'a>(&'a self, env: &'a mut JobEnv, step: &'a PlannedStep)
        -> BoxFuture<'a, StepResult>;

    /// Upload coverage.
    fn upload<'a>(&'a self, env: &'a mut JobEnv, step: &'a PlannedStep) -> BoxFuture<'a, StepResult>;

    /// Release the workspace. Runs whether or not the job succeeded.
    fn cleanup(&self, env: JobEnv) -> BoxFuture<'_, Result<()>>;
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ciflow_core::trigger::EventKind;

    fn instance() -> JobInstance {
        JobInstance {
            id: "lint".into(),
            job_id: "lint".into(),
            name: "lint".into(),
            runs_on: "ubuntu-latest".into(),
            matrix: Vec::new(),
            env: BTreeMap::from([("CI".to_string(), "overridden".to_string())]),
            steps: Vec::new(),
        }
    }

    #[test]
    fn standard_variables_are_set() {
        let trigger = Trigger::new(EventKind::PullRequest, "master").with_sha("abc123");
        let env = JobEnv::new(&instance(), &trigger, PathBuf::from("/w/run/lint"));
        assert_eq!(env.vars["GITHUB_ACTIONS"], "false");
        assert_eq!(env.vars["GITHUB_SHA"], "abc123");
        assert_eq!(env.vars["GITHUB_EVENT_NAME"], "pull_request");
        assert_eq!(env.vars["GITHUB_WORKSPACE"], "/w/run/lint/workspace");
        assert_eq!(env.vars["CIFLOW_JOB"], "lint");
        // job env wins over defaults
        assert_eq!(env.vars["CI"], "overridden");
    }

    #[test]
    fn step_env_overrides_job_env() {
        let trigger = Trigger::new(EventKind::Push, "master");
        let env = JobEnv::new(&instance(), &trigger, PathBuf::from("/w"));
        let step = BTreeMap::from([("CIFLOW_JOB".to_string(), "step".to_string())]);
        let merged: BTreeMap<_, _> = env.process_env(&step).unwrap().into_iter().collect();
        assert_eq!(merged["CIFLOW_JOB"], "step");
        assert!(!merged.contains_key("PATH"));
    }

    #[test]
    fn path_additions_come_first_newest_first() {
        let trigger = Trigger::new(EventKind::Push, "master");
        let mut env = JobEnv::new(&instance(), &trigger, PathBuf::from("/w"));
        env.path.push(PathBuf::from("/first"));
        env.path.push(PathBuf::from("/second"));
        let merged: BTreeMap<_, _> = env
            .process_env(&BTreeMap::new())
            .unwrap()
            .into_iter()
            .collect();
        let entries: Vec<_> = std::env::split_paths(&merged["PATH"]).collect();
        assert_eq!(entries[0], PathBuf::from("/second"));
        assert_eq!(entries[1], PathBuf::from("/first"));
    }

    #[test]
    fn command_files_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let trigger = Trigger::new(EventKind::Push, "master");
        let mut env = JobEnv::new(&instance(), &trigger, dir.path().to_path_buf());
        env.reset_command_files().unwrap();
        std::fs::write(env.github_path_file(), "/venv/bin\n").unwrap();
        std::fs::write(env.github_env_file(), "VIRTUAL_ENV=/venv\n").unwrap();
        env.absorb_command_files().unwrap();
        assert_eq!(env.path, vec![PathBuf::from("/venv/bin")]);
        assert_eq!(env.vars["VIRTUAL_ENV"], "/venv");
    }

    #[test]
    fn env_file_heredoc_values() {
        let parsed = parse_env_file("A=1\nNOTES<<EOF\nline one\nline two\nEOF\nB=x=y\n");
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("NOTES".to_string(), "line one\nline two".to_string()),
                ("B".to_string(), "x=y".to_string()),
            ]
        );
    }
}
