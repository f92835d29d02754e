use crate::output::{format_duration_ms, print_json, print_table};
use anyhow::Context;
use ciflow_core::record::{RunReport, StepStatus};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum RunsSubcommand {
    /// List recorded runs, newest first
    List,

    /// Show one run in detail
    Show {
        /// Run id or unique id prefix
        id: String,
    },
}

pub fn run(root: &Path, subcmd: RunsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RunsSubcommand::List => list(root, json),
        RunsSubcommand::Show { id } => show(root, &id, json),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let runs = RunReport::list(root).context("failed to read run records")?;

    if json {
        let items: Vec<_> = runs
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "workflow": r.workflow,
                    "event": r.trigger.event,
                    "branch": r.trigger.branch,
                    "started_at": r.started_at,
                    "jobs": r.jobs.len(),
                    "failed": r.failed_jobs().count(),
                })
            })
            .collect();
        return print_json(&items);
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    let rows = runs
        .iter()
        .map(|r| {
            let failed = r.failed_jobs().count();
            let result = if failed == 0 {
                "success".to_string()
            } else {
                format!("{failed} failed")
            };
            vec![
                r.short_id().to_string(),
                r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                format!("{} {}", r.trigger.event, r.trigger.branch),
                r.jobs.len().to_string(),
                result,
            ]
        })
        .collect();
    print_table(&["ID", "STARTED", "TRIGGER", "JOBS", "RESULT"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let report = RunReport::load(root, id)?;

    if json {
        return print_json(&report);
    }

    println!("Run:      {}", report.id);
    println!("Workflow: {}", report.workflow);
    println!(
        "Trigger:  {} on '{}' at {}",
        report.trigger.event,
        report.trigger.branch,
        report.trigger.revision()
    );
    println!("Started:  {}", report.started_at.to_rfc3339());

    for job in &report.jobs {
        println!(
            "\n{} [{}] {}",
            job.name,
            job.status,
            format_duration_ms(job.duration_ms)
        );
        if let Some(error) = &job.error {
            println!("  error: {error}");
        }
        for step in &job.steps {
            let marker = match step.status {
                StepStatus::Success => "ok  ",
                StepStatus::Failed => "FAIL",
                StepStatus::Skipped => "skip",
            };
            let duration = step.duration_ms.map(format_duration_ms).unwrap_or_default();
            println!("  {marker} {}  {}  {duration}", step.index, step.name);
            if let Some(failure) = &step.failure {
                println!("       {failure}");
            }
            for warning in &step.warnings {
                println!("       warning: {warning}");
            }
        }
    }
    Ok(())
}
