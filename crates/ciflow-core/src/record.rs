//! Run records: what happened to every job and step of a run, persisted as
//! YAML under `.ciflow/runs/`.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CiError, Result};
use crate::matrix::{self, Combination};
use crate::paths;
use crate::trigger::Trigger;

// ---------------------------------------------------------------------------
// StepFailure
// ---------------------------------------------------------------------------

/// Why a step failed. A failed step stops its job; later steps are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepFailure {
    Checkout {
        message: String,
    },
    Setup {
        message: String,
    },
    /// Non-zero exit, or `exit_code: None` when killed by a signal.
    Command {
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        stderr_tail: String,
    },
    Upload {
        message: String,
    },
    Unsupported {
        uses: String,
    },
    /// The executor panicked while running the step.
    Crashed {
        message: String,
    },
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Checkout { message } => write!(f, "checkout failed: {message}"),
            StepFailure::Setup { message } => write!(f, "setup failed: {message}"),
            StepFailure::Command {
                exit_code: Some(code),
                ..
            } => write!(f, "command exited with code {code}"),
            StepFailure::Command {
                exit_code: None, ..
            } => f.write_str("command terminated by signal"),
            StepFailure::Upload { message } => write!(f, "upload failed: {message}"),
            StepFailure::Unsupported { uses } => write!(f, "unsupported action '{uses}'"),
            StepFailure::Crashed { message } => write!(f, "step crashed: {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub name: String,
    pub kind: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StepReport {
    pub fn skipped(index: usize, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            kind: kind.into(),
            status: StepStatus::Skipped,
            duration_ms: None,
            exit_code: None,
            failure: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: String,
    pub job_id: String,
    pub name: String,
    #[serde(default, with = "matrix::pairs", skip_serializing_if = "Vec::is_empty")]
    pub matrix: Combination,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepReport>,
    /// Failure outside any step (workspace creation, a crashed job task).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    /// The first failed step, if any.
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    /// One-line reason for a failed job.
    pub fn failure_summary(&self) -> Option<String> {
        if let Some(step) = self.failed_step() {
            let reason = step
                .failure
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "failed".to_string());
            return Some(format!("step {} ({}): {reason}", step.index, step.name));
        }
        self.error.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: String,
    pub workflow: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn new(workflow: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow: workflow.into(),
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            jobs: Vec::new(),
        }
    }

    pub fn finish(&mut self, jobs: Vec<JobReport>) {
        self.jobs = jobs;
        self.finished_at = Some(Utc::now());
    }

    pub fn all_succeeded(&self) -> bool {
        self.jobs.iter().all(|j| j.status == JobStatus::Success)
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| j.status == JobStatus::Failed)
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::run_record_path(root, &self.id), data.as_bytes())
    }

    /// Load by full id or unique id prefix.
    pub fn load(root: &Path, id: &str) -> Result<Self> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Err(CiError::InvalidRunId(id.to_string()));
        }
        let exact = paths::run_record_path(root, id);
        if exact.exists() {
            let data = std::fs::read_to_string(&exact)?;
            return Ok(serde_yaml::from_str(&data)?);
        }

        let matches: Vec<_> = Self::record_ids(root)?
            .into_iter()
            .filter(|candidate| candidate.starts_with(id))
            .collect();
        match matches.as_slice() {
            [] => Err(CiError::RunNotFound(id.to_string())),
            [only] => {
                let data = std::fs::read_to_string(paths::run_record_path(root, only))?;
                Ok(serde_yaml::from_str(&data)?)
            }
            _ => Err(CiError::AmbiguousRun(id.to_string())),
        }
    }

    /// Every stored run, newest first.
    pub fn list(root: &Path) -> Result<Vec<Self>> {
        let mut runs = Vec::new();
        for id in Self::record_ids(root)? {
            let data = std::fs::read_to_string(paths::run_record_path(root, &id))?;
            runs.push(serde_yaml::from_str::<RunReport>(&data)?);
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    fn record_ids(root: &Path) -> Result<Vec<String>> {
        let dir = paths::runs_dir(root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }
}
