//! Structural checks on a workflow before anything runs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::WarnLevel;
use crate::expr::{self, Context};
use crate::paths::validate_job_id;
use crate::trigger::EventKind;
use crate::workflow::{JobDef, StepKind, Workflow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowWarning {
    pub level: WarnLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    pub message: String,
}

impl WorkflowWarning {
    fn error(job: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            job: job.map(str::to_string),
            message: message.into(),
        }
    }

    fn warning(job: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            job: job.map(str::to_string),
            message: message.into(),
        }
    }
}

pub fn has_errors(warnings: &[WorkflowWarning]) -> bool {
    warnings.iter().any(|w| w.level == WarnLevel::Error)
}

pub fn validate(workflow: &Workflow) -> Vec<WorkflowWarning> {
    let mut warnings = Vec::new();

    if workflow.on.events.is_empty() {
        warnings.push(WorkflowWarning::error(None, "workflow declares no trigger events"));
    }
    for name in workflow.on.event_names() {
        if name.parse::<EventKind>().is_err() {
            warnings.push(WorkflowWarning::warning(
                None,
                format!("event '{name}' is never raised locally and will not trigger a run"),
            ));
        }
    }

    if workflow.jobs.is_empty() {
        warnings.push(WorkflowWarning::error(None, "workflow declares no jobs"));
    }

    for (job_id, job) in &workflow.jobs {
        if let Err(e) = validate_job_id(job_id) {
            warnings.push(WorkflowWarning::error(Some(job_id), e.to_string()));
        }
        validate_job(job_id, job, &mut warnings);
    }

    warnings
}

fn validate_job(job_id: &str, job: &JobDef, warnings: &mut Vec<WorkflowWarning>) {
    let job_ref = Some(job_id);

    let mut matrix_keys: HashSet<String> = HashSet::new();
    if let Some(matrix) = job.matrix() {
        match matrix.expand(job_id) {
            Ok(combos) => {
                for combo in combos {
                    matrix_keys.extend(combo.into_iter().map(|(k, _)| k));
                }
            }
            Err(e) => warnings.push(WorkflowWarning::error(job_ref, e.to_string())),
        }
    }

    if job.steps.is_empty() {
        warnings.push(WorkflowWarning::error(job_ref, "job has no steps"));
        return;
    }

    let mut kinds = Vec::with_capacity(job.steps.len());
    for (idx, step) in job.steps.iter().enumerate() {
        match step.kind() {
            Ok(StepKind::Unsupported { uses }) => {
                warnings.push(WorkflowWarning::error(
                    job_ref,
                    format!("step {idx} uses unsupported action '{uses}'"),
                ));
                kinds.push(None);
            }
            Ok(kind) => kinds.push(Some(kind)),
            Err(reason) => {
                warnings.push(WorkflowWarning::error(job_ref, format!("step {idx}: {reason}")));
                kinds.push(None);
            }
        }

        let mut texts: Vec<&str> = Vec::new();
        texts.extend(step.name.as_deref());
        texts.extend(step.run.as_deref());
        texts.extend(step.working_directory.as_deref());
        texts.extend(step.with_inputs.values().map(String::as_str));
        texts.extend(step.env.values().map(String::as_str));
        check_expressions(job_id, idx, &texts, &matrix_keys, warnings);
    }

    if !matches!(kinds.first(), Some(Some(StepKind::Checkout { .. }))) {
        warnings.push(WorkflowWarning::error(
            job_ref,
            "first step must check out the repository",
        ));
    }
    if !matches!(kinds.get(1), Some(Some(StepKind::Composite { .. }))) {
        warnings.push(WorkflowWarning::error(
            job_ref,
            "second step must run the setup action",
        ));
    }

    let checkouts = kinds
        .iter()
        .filter(|k| matches!(k, Some(StepKind::Checkout { .. })))
        .count();
    if checkouts > 1 {
        warnings.push(WorkflowWarning::warning(
            job_ref,
            "repository is checked out more than once",
        ));
    }

    let first_command = kinds
        .iter()
        .position(|k| matches!(k, Some(StepKind::Command { .. })));
    for (idx, kind) in kinds.iter().enumerate() {
        if let Some(StepKind::Upload { .. }) = kind {
            if first_command.map_or(true, |c| c > idx) {
                warnings.push(WorkflowWarning::error(
                    job_ref,
                    format!("step {idx} uploads coverage before any command produced it"),
                ));
            }
        }
    }
}

fn check_expressions(
    job_id: &str,
    idx: usize,
    texts: &[&str],
    matrix_keys: &HashSet<String>,
    warnings: &mut Vec<WorkflowWarning>,
) {
    for text in texts {
        match expr::references(text) {
            Ok(refs) => {
                for r in refs {
                    match r.context {
                        Context::Matrix if !matrix_keys.contains(&r.property) => {
                            warnings.push(WorkflowWarning::warning(
                                Some(job_id),
                                format!(
                                    "step {idx} references matrix.{} which is not defined and evaluates to ''",
                                    r.property
                                ),
                            ));
                        }
                        Context::Inputs => {
                            warnings.push(WorkflowWarning::warning(
                                Some(job_id),
                                format!("step {idx} references inputs.{} outside an action", r.property),
                            ));
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => warnings.push(WorkflowWarning::error(Some(job_id), format!("step {idx}: {e}"))),
        }
    }
}
