use crate::output::{print_json, print_table};
use anyhow::Context;
use ciflow_core::plan::{self, JobInstance, RunPlan};
use ciflow_core::workflow::StepKind;
use std::path::Path;

use super::TriggerArgs;

pub fn run(
    root: &Path,
    workflow_override: Option<&Path>,
    trigger: &TriggerArgs,
    jobs: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let (_, _, workflow) = super::load_workflow(root, workflow_override)?;
    let trigger = trigger.trigger()?;
    let plan = plan::plan(&workflow, &trigger, jobs).context("failed to plan run")?;

    if json {
        return print_json(&plan);
    }
    print_plan(&plan);
    Ok(())
}

pub fn print_plan(plan: &RunPlan) {
    if !plan.triggered {
        println!(
            "'{}' is not triggered by {} on '{}'.",
            plan.workflow, plan.trigger.event, plan.trigger.branch
        );
        return;
    }

    println!(
        "{}: {} job(s) for {} on '{}'\n",
        plan.workflow,
        plan.jobs.len(),
        plan.trigger.event,
        plan.trigger.branch
    );
    let rows = plan
        .jobs
        .iter()
        .map(|job| {
            vec![
                job.id.clone(),
                job.name.clone(),
                matrix_label(job),
                job.runs_on.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "MATRIX", "RUNS-ON"], rows);

    for job in &plan.jobs {
        println!("\n{}", job.id);
        for step in &job.steps {
            println!("  {}  {:<8}  {}", step.index, step.kind.label(), step_detail(&step.kind));
        }
    }
}

fn matrix_label(job: &JobInstance) -> String {
    if job.matrix.is_empty() {
        return "-".to_string();
    }
    job.matrix
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn step_detail(kind: &StepKind) -> String {
    match kind {
        StepKind::Checkout { uses } | StepKind::Unsupported { uses } => uses.clone(),
        StepKind::Composite { path, inputs } | StepKind::Upload { uses: path, inputs } => {
            if inputs.is_empty() {
                path.clone()
            } else {
                let args: Vec<String> = inputs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!("{path} ({})", args.join(", "))
            }
        }
        StepKind::Command { run, .. } => run.lines().next().unwrap_or_default().to_string(),
    }
}
