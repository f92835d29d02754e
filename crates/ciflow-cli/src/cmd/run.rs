use crate::output::{format_duration_ms, print_json, print_table};
use anyhow::Context;
use ciflow_core::{paths, plan, record::RunReport, validate};
use ciflow_runner::{LocalExecutor, Orchestrator};
use clap::Args;
use std::path::Path;

use super::TriggerArgs;

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// Revision to check out (default: HEAD)
    #[arg(long)]
    pub sha: Option<String>,

    /// Only run these jobs (repeatable)
    #[arg(long = "job", value_name = "ID")]
    pub jobs: Vec<String>,

    /// Maximum concurrent jobs; 0 = unbounded (default: from config)
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Leave job workspaces on disk after the run
    #[arg(long)]
    pub keep_workspaces: bool,
}

pub fn run(
    root: &Path,
    workflow_override: Option<&Path>,
    args: RunArgs,
    json: bool,
) -> anyhow::Result<()> {
    let (config, _, workflow) = super::load_workflow(root, workflow_override)?;

    let warnings = validate::validate(&workflow);
    if validate::has_errors(&warnings) {
        super::validate::print_warnings(&warnings);
        anyhow::bail!("workflow has errors; see `ciflow validate`");
    }

    let mut trigger = args.trigger.trigger()?;
    if let Some(sha) = args.sha {
        trigger = trigger.with_sha(sha);
    }
    let plan = plan::plan(&workflow, &trigger, &args.jobs).context("failed to plan run")?;
    if !plan.triggered {
        if json {
            return print_json(&plan);
        }
        super::plan::print_plan(&plan);
        return Ok(());
    }

    let executor = LocalExecutor::new(root, &config)
        .context("failed to create executor")?
        .keep_workspaces(args.keep_workspaces || config.runner.keep_workspaces);
    let max_parallel = args.max_parallel.unwrap_or(config.runner.max_parallel);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(
        Orchestrator::new(executor)
            .max_parallel(max_parallel)
            .run(&plan),
    );
    report.save(root).context("failed to save run record")?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
        println!(
            "\nRun {} recorded in {}/{}.yaml",
            report.short_id(),
            paths::RUNS_DIR,
            report.id
        );
    }

    let failed = report.failed_jobs().count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} job(s) failed", report.jobs.len());
    }
    Ok(())
}

pub fn print_report(report: &RunReport) {
    let rows = report
        .jobs
        .iter()
        .map(|job| {
            vec![
                job.id.clone(),
                job.status.to_string(),
                format_duration_ms(job.duration_ms),
                job.failure_summary().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["JOB", "STATUS", "DURATION", "DETAIL"], rows);

    let warnings: Vec<_> = report
        .jobs
        .iter()
        .flat_map(|j| j.steps.iter().flat_map(move |s| s.warnings.iter().map(move |w| (j, w))))
        .collect();
    for (job, warning) in warnings {
        println!("[warning] {}: {warning}", job.id);
    }
}
