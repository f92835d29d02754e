use crate::output::print_json;
use ciflow_core::{
    action::CompositeAction,
    config::WarnLevel,
    validate::{self, WorkflowWarning},
    workflow::{StepKind, Workflow},
};
use std::path::Path;

pub fn run(root: &Path, workflow_override: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let (_, path, workflow) = super::load_workflow(root, workflow_override)?;

    let mut warnings = validate::validate(&workflow);
    warnings.extend(check_local_actions(root, &workflow));

    if json {
        let value = serde_json::json!({
            "workflow": path.display().to_string(),
            "jobs": workflow.jobs.len(),
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!(
            "{} is valid ({} jobs). No warnings.",
            path.display(),
            workflow.jobs.len()
        );
    } else {
        print_warnings(&warnings);
    }

    if validate::has_errors(&warnings) {
        anyhow::bail!("workflow validation found errors");
    }
    Ok(())
}

pub fn print_warnings(warnings: &[WorkflowWarning]) {
    for w in warnings {
        let prefix = match w.level {
            WarnLevel::Warning => "warning",
            WarnLevel::Error => "error",
        };
        match &w.job {
            Some(job) => println!("[{prefix}] {job}: {}", w.message),
            None => println!("[{prefix}] {}", w.message),
        }
    }
}

/// Every composite action a job references must exist in the project and parse.
fn check_local_actions(root: &Path, workflow: &Workflow) -> Vec<WorkflowWarning> {
    let mut warnings = Vec::new();
    for (job_id, job) in &workflow.jobs {
        for step in &job.steps {
            let Ok(StepKind::Composite { path, .. }) = step.kind() else {
                continue;
            };
            if let Err(e) = CompositeAction::load(&root.join(path.trim_start_matches("./"))) {
                warnings.push(WorkflowWarning {
                    level: WarnLevel::Error,
                    job: Some(job_id.clone()),
                    message: e.to_string(),
                });
            }
        }
    }
    warnings
}
