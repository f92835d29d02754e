use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;

use ciflow_core::plan::{JobInstance, PlannedStep, RunPlan};
use ciflow_core::record::{JobReport, JobStatus, RunReport, StepFailure, StepReport, StepStatus};
use ciflow_core::trigger::Trigger;
use ciflow_core::workflow::StepKind;

use crate::executor::{JobEnv, StepExecutor, StepResult};
use crate::RunnerError;

// ─── Orchestrator ─────────────────────────────────────────────────────────

/// Runs every job instance of a plan as its own tokio task.
///
/// Jobs share nothing: a failing or panicking job never affects another.
/// Within a job the first failed step stops it and the remaining steps are
/// recorded as skipped. A panic inside a step fails that step; cleanup
/// still runs.
pub struct Orchestrator {
    executor: Arc<dyn StepExecutor>,
    max_parallel: usize,
}

impl Orchestrator {
    pub fn new<E: StepExecutor + 'static>(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
            max_parallel: 0,
        }
    }

    /// Bound the number of jobs running at once; 0 means unbounded.
    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n;
        self
    }

    /// Execute `plan` and return the finished report. Job reports keep the
    /// plan's order regardless of completion order.
    pub async fn run(&self, plan: &RunPlan) -> RunReport {
        let mut report = RunReport::new(plan.workflow.clone(), plan.trigger.clone());
        let run_id = Arc::new(report.id.clone());
        let limit = (self.max_parallel > 0).then(|| Arc::new(Semaphore::new(self.max_parallel)));

        tracing::info!(
            run = %report.short_id(),
            jobs = plan.jobs.len(),
            "starting run of '{}'",
            plan.workflow
        );

        let handles: Vec<_> = plan
            .jobs
            .iter()
            .cloned()
            .map(|job| {
                let executor = Arc::clone(&self.executor);
                let run_id = Arc::clone(&run_id);
                let trigger = plan.trigger.clone();
                let limit = limit.clone();
                tokio::spawn(async move {
                    // Held for the whole job; released on drop.
                    let _permit = match limit {
                        Some(sem) => sem.acquire_owned().await.ok(),
                        None => None,
                    };
                    run_job(executor.as_ref(), &run_id, &job, &trigger).await
                })
            })
            .collect();

        let mut jobs = Vec::with_capacity(handles.len());
        for (handle, job) in handles.into_iter().zip(&plan.jobs) {
            let job_report = match handle.await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(job = %job.id, "job task crashed: {e}");
                    aborted(job, Utc::now(), 0, format!("job task crashed: {e}"))
                }
            };
            jobs.push(job_report);
        }

        report.finish(jobs);
        tracing::info!(
            run = %report.short_id(),
            failed = report.failed_jobs().count(),
            "run finished"
        );
        report
    }
}

// ─── Per-job sequencing ───────────────────────────────────────────────────

async fn run_job(
    executor: &dyn StepExecutor,
    run_id: &str,
    job: &JobInstance,
    trigger: &Trigger,
) -> JobReport {
    let started_at = Utc::now();
    let clock = Instant::now();
    tracing::info!(job = %job.id, "▶ {}", job.name);

    let prepared = AssertUnwindSafe(executor.prepare(run_id, job, trigger))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(RunnerError::Process(format!("panicked: {}", panic_message(panic))))
        });
    let mut env = match prepared {
        Ok(env) => env,
        Err(e) => {
            tracing::error!(job = %job.id, "workspace preparation failed: {e}");
            return aborted(
                job,
                started_at,
                elapsed_ms(clock),
                format!("workspace preparation failed: {e}"),
            );
        }
    };

    let mut steps = Vec::with_capacity(job.steps.len());
    let mut failed = false;
    for step in &job.steps {
        if failed {
            steps.push(StepReport::skipped(step.index, &step.name, step.kind.label()));
            continue;
        }

        tracing::info!(job = %job.id, step = step.index, "{} ({})", step.name, step.kind.label());
        let step_clock = Instant::now();
        let result = AssertUnwindSafe(dispatch(executor, &mut env, step))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(StepFailure::Crashed {
                    message: panic_message(panic),
                })
            });

        let step_report = step_report(step, result, elapsed_ms(step_clock));
        if let Some(failure) = &step_report.failure {
            tracing::error!(job = %job.id, step = step.index, "{failure}");
            failed = true;
        }
        steps.push(step_report);
    }

    match AssertUnwindSafe(executor.cleanup(env)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(job = %job.id, "workspace cleanup failed: {e}"),
        Err(panic) => tracing::warn!(
            job = %job.id,
            "workspace cleanup panicked: {}",
            panic_message(panic)
        ),
    }

    let status = if failed {
        JobStatus::Failed
    } else {
        JobStatus::Success
    };
    tracing::info!(job = %job.id, %status, "■ {}", job.name);

    JobReport {
        id: job.id.clone(),
        job_id: job.job_id.clone(),
        name: job.name.clone(),
        matrix: job.matrix.clone(),
        status,
        started_at,
        duration_ms: elapsed_ms(clock),
        steps,
        error: None,
    }
}

async fn dispatch(executor: &dyn StepExecutor, env: &mut JobEnv, step: &PlannedStep) -> StepResult {
    match &step.kind {
        StepKind::Checkout { .. } => executor.checkout(env, step).await,
        StepKind::Composite { .. } => executor.setup(env, step).await,
        StepKind::Command { .. } => executor.command(env, step).await,
        StepKind::Upload { .. } => executor.upload(env, step).await,
        StepKind::Unsupported { uses } => Err(StepFailure::Unsupported { uses: uses.clone() }),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn step_report(step: &PlannedStep, result: StepResult, duration_ms: u64) -> StepReport {
    let mut report = StepReport::skipped(step.index, &step.name, step.kind.label());
    report.duration_ms = Some(duration_ms);
    match result {
        Ok(outcome) => {
            report.status = StepStatus::Success;
            report.exit_code = outcome.exit_code;
            report.warnings = outcome.warnings;
        }
        Err(failure) => {
            report.status = StepStatus::Failed;
            if let StepFailure::Command { exit_code, .. } = &failure {
                report.exit_code = *exit_code;
            }
            report.failure = Some(failure);
        }
    }
    report
}

/// A job that never reached its steps, or whose task died.
fn aborted(
    job: &JobInstance,
    started_at: chrono::DateTime<Utc>,
    duration_ms: u64,
    error: String,
) -> JobReport {
    JobReport {
        id: job.id.clone(),
        job_id: job.job_id.clone(),
        name: job.name.clone(),
        matrix: job.matrix.clone(),
        status: JobStatus::Failed,
        started_at,
        duration_ms,
        steps: job
            .steps
            .iter()
            .map(|s| StepReport::skipped(s.index, &s.name, s.kind.label()))
            .collect(),
        error: Some(error),
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    clock.elapsed().as_millis() as u64
}
