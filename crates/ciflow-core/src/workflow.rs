//! Workflow definition: the `on:` block, jobs in declaration order, and
//! their steps.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CiError, Result};
use crate::matrix::{scalar_to_string, Matrix};
use crate::trigger::TriggerSpec;

pub const CHECKOUT_ACTION: &str = "actions/checkout";
pub const COVERALLS_ACTION: &str = "coverallsapp/github-action";

/// `path-to-lcov` when the upload step does not set it.
pub const DEFAULT_LCOV_PATH: &str = "./coverage/lcov.info";

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: Option<String>,
    pub on: TriggerSpec,
    #[serde(default, deserialize_with = "deserialize_jobs")]
    pub jobs: Vec<(String, JobDef)>,
}

impl Workflow {
    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CiError::WorkflowNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    pub fn job(&self, id: &str) -> Option<&JobDef> {
        self.jobs
            .iter()
            .find(|(job_id, _)| job_id == id)
            .map(|(_, job)| job)
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|(id, _)| id.as_str())
    }
}

fn deserialize_jobs<'de, D>(d: D) -> std::result::Result<Vec<(String, JobDef)>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let map = serde_yaml::Mapping::deserialize(d)?;
    let mut jobs = Vec::with_capacity(map.len());
    for (key, value) in map {
        let id = key
            .as_str()
            .ok_or_else(|| D::Error::custom("job ids must be strings"))?
            .to_string();
        let job: JobDef = serde_yaml::from_value(value)
            .map_err(|e| D::Error::custom(format!("job '{id}': {e}")))?;
        jobs.push((id, job));
    }
    Ok(jobs)
}

// ---------------------------------------------------------------------------
// JobDef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct JobDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "runs-on", default = "default_runs_on")]
    pub runs_on: String,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default, deserialize_with = "deserialize_scalar_map")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepDef>,
}

fn default_runs_on() -> String {
    "ubuntu-latest".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub matrix: Option<Matrix>,
}

impl JobDef {
    pub fn matrix(&self) -> Option<&Matrix> {
        self.strategy.as_ref().and_then(|s| s.matrix.as_ref())
    }
}

// ---------------------------------------------------------------------------
// StepDef / StepKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default, rename = "with", deserialize_with = "deserialize_scalar_map")]
    pub with_inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar_map")]
    pub env: BTreeMap<String, String>,
}

/// What a step does, derived from its `uses` / `run` fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Checkout {
        uses: String,
    },
    Composite {
        path: String,
        inputs: BTreeMap<String, String>,
    },
    Upload {
        uses: String,
        inputs: BTreeMap<String, String>,
    },
    Command {
        run: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
    },
    Unsupported {
        uses: String,
    },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Checkout { .. } => "checkout",
            StepKind::Composite { .. } => "setup",
            StepKind::Upload { .. } => "upload",
            StepKind::Command { .. } => "command",
            StepKind::Unsupported { .. } => "unsupported",
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, StepKind::Command { .. })
    }
}

/// Strip the `@ref` suffix from a `uses:` value.
fn action_name(uses: &str) -> &str {
    uses.split_once('@').map(|(name, _)| name).unwrap_or(uses)
}

impl StepDef {
    pub fn kind(&self) -> std::result::Result<StepKind, String> {
        match (&self.uses, &self.run) {
            (Some(_), Some(_)) => Err("a step cannot have both `uses` and `run`".into()),
            (None, None) => Err("a step must have either `uses` or `run`".into()),
            (None, Some(run)) => Ok(StepKind::Command {
                run: run.clone(),
                shell: self.shell.clone(),
                working_directory: self.working_directory.clone(),
            }),
            (Some(uses), None) => {
                if uses.starts_with("./") {
                    return Ok(StepKind::Composite {
                        path: uses.clone(),
                        inputs: self.with_inputs.clone(),
                    });
                }
                let kind = match action_name(uses) {
                    CHECKOUT_ACTION => StepKind::Checkout { uses: uses.clone() },
                    COVERALLS_ACTION => StepKind::Upload {
                        uses: uses.clone(),
                        inputs: self.with_inputs.clone(),
                    },
                    _ => StepKind::Unsupported { uses: uses.clone() },
                };
                Ok(kind)
            }
        }
    }

    /// Display name: explicit `name`, else `uses`, else the first line of `run`.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(uses) = &self.uses {
            return uses.clone();
        }
        self.run
            .as_deref()
            .and_then(|r| r.lines().next())
            .unwrap_or("step")
            .trim()
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Coverage upload inputs
// ---------------------------------------------------------------------------

/// Inputs of the coverage upload action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSpec {
    pub github_token: Option<String>,
    pub path_to_lcov: String,
    pub fail_on_error: bool,
}

impl UploadSpec {
    pub fn from_inputs(inputs: &BTreeMap<String, String>) -> Self {
        Self {
            github_token: inputs
                .get("github-token")
                .filter(|t| !t.is_empty())
                .cloned(),
            path_to_lcov: inputs
                .get("path-to-lcov")
                .cloned()
                .unwrap_or_else(|| DEFAULT_LCOV_PATH.to_string()),
            fail_on_error: inputs
                .get("fail-on-error")
                .map(|v| v != "false")
                .unwrap_or(true),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn deserialize_scalar_map<'de, D>(d: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let map = Option::<serde_yaml::Mapping>::deserialize(d)?.unwrap_or_default();
    let mut out = BTreeMap::new();
    for (key, value) in map {
        let key = key
            .as_str()
            .ok_or_else(|| D::Error::custom("keys must be strings"))?
            .to_string();
        let value = scalar_to_string(&value)
            .ok_or_else(|| D::Error::custom(format!("value of '{key}' must be a scalar")))?;
        out.insert(key, value);
    }
    Ok(out)
}
