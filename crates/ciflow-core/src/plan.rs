//! Turn a workflow and a trigger into the concrete job instances to run.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::error::{CiError, Result};
use crate::expr::{self, Context, ExprContext};
use crate::matrix::{self, Combination};
use crate::paths::slugify;
use crate::trigger::{EventKind, Trigger};
use crate::workflow::{JobDef, StepKind, Workflow};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStep {
    pub index: usize,
    pub name: String,
    pub kind: StepKind,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// One schedulable job: a job definition bound to one matrix combination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInstance {
    /// Unique, filesystem-safe id within the plan.
    pub id: String,
    pub job_id: String,
    pub name: String,
    pub runs_on: String,
    #[serde(with = "matrix::pairs", skip_serializing_if = "Vec::is_empty")]
    pub matrix: Combination,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub workflow: String,
    pub trigger: Trigger,
    /// False when the trigger does not match the workflow's `on:` block.
    pub triggered: bool,
    pub jobs: Vec<JobInstance>,
}

/// `github.*` values known from the trigger.
pub fn github_values(trigger: &Trigger) -> Vec<(&'static str, String)> {
    let mut values = vec![
        ("event_name", trigger.event.as_str().to_string()),
        ("ref_name", trigger.branch.clone()),
        ("sha", trigger.revision().to_string()),
    ];
    match trigger.event {
        EventKind::Push => values.push(("ref", format!("refs/heads/{}", trigger.branch))),
        EventKind::PullRequest => values.push(("base_ref", trigger.branch.clone())),
    }
    values
}

/// Plan a run.
///
/// `only` restricts the plan to the given job ids (empty = every job).
/// A trigger that does not match the workflow yields an empty plan.
pub fn plan(workflow: &Workflow, trigger: &Trigger, only: &[String]) -> Result<RunPlan> {
    for id in only {
        if workflow.job(id).is_none() {
            return Err(CiError::JobNotFound(id.clone()));
        }
    }

    let triggered = workflow.on.matches(trigger);
    let mut jobs = Vec::new();
    if triggered {
        let github = github_values(trigger);
        let mut used_ids = HashSet::new();
        for (job_id, job) in &workflow.jobs {
            if !only.is_empty() && !only.iter().any(|o| o == job_id) {
                continue;
            }
            for instance in expand_job(job_id, job, &github)? {
                let mut id = instance.id.clone();
                let mut n = 2;
                while !used_ids.insert(id.clone()) {
                    id = format!("{}-{n}", instance.id);
                    n += 1;
                }
                jobs.push(JobInstance { id, ..instance });
            }
        }
    }

    Ok(RunPlan {
        workflow: workflow.display_name().to_string(),
        trigger: trigger.clone(),
        triggered,
        jobs,
    })
}

/// Expand one job definition into its instances.
pub fn expand_job(
    job_id: &str,
    job: &JobDef,
    github: &[(&'static str, String)],
) -> Result<Vec<JobInstance>> {
    let combos = match job.matrix() {
        Some(m) => m.expand(job_id)?,
        None => vec![Vec::new()],
    };

    combos
        .into_iter()
        .map(|combo| instantiate(job_id, job, combo, github))
        .collect()
}

fn instantiate(
    job_id: &str,
    job: &JobDef,
    combo: Combination,
    github: &[(&'static str, String)],
) -> Result<JobInstance> {
    // Workflow-level steps see an empty `inputs` context.
    let base = ExprContext::new()
        .bind(Context::Matrix, combo.clone())
        .bind(Context::Github, github.iter().cloned())
        .bind(Context::Inputs, std::iter::empty::<(String, String)>());
    let no_env = base
        .clone()
        .bind(Context::Env, std::iter::empty::<(String, String)>());
    let job_env = substitute_map(&job.env, &no_env)?;
    let ctx = base.bind(Context::Env, job_env.clone());

    let base_name = match &job.name {
        Some(name) => expr::substitute(name, &ctx)?,
        None => job_id.to_string(),
    };
    let name = if combo.is_empty() || job.name.is_some() {
        base_name
    } else {
        let values: Vec<&str> = combo.iter().map(|(_, v)| v.as_str()).collect();
        format!("{base_name} ({})", values.join(", "))
    };

    let steps = job
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let kind = step.kind().map_err(|reason| CiError::InvalidStep {
                job: job_id.to_string(),
                index,
                reason,
            })?;
            let env = substitute_map(&step.env, &ctx)?;
            let step_ctx = ctx.clone().bind(Context::Env, env.clone());
            Ok(PlannedStep {
                index,
                name: expr::substitute(&step.display_name(), &step_ctx)?,
                kind: resolve_kind(kind, &step_ctx)?,
                env,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(JobInstance {
        id: instance_id(&name, job_id, &combo),
        job_id: job_id.to_string(),
        name,
        runs_on: job.runs_on.clone(),
        matrix: combo,
        env: job_env,
        steps,
    })
}

/// Slug of the display name, or of the job id and matrix values when the
/// name has no ASCII alphanumerics. Never empty.
fn instance_id(name: &str, job_id: &str, combo: &Combination) -> String {
    let slug = slugify(name);
    if !slug.is_empty() {
        return slug;
    }
    let parts: Vec<&str> = std::iter::once(job_id)
        .chain(combo.iter().map(|(_, v)| v.as_str()))
        .collect();
    let slug = slugify(&parts.join(" "));
    if slug.is_empty() {
        "job".to_string()
    } else {
        slug
    }
}

fn resolve_kind(kind: StepKind, ctx: &ExprContext) -> Result<StepKind> {
    Ok(match kind {
        StepKind::Composite { path, inputs } => StepKind::Composite {
            path,
            inputs: substitute_map(&inputs, ctx)?,
        },
        StepKind::Upload { uses, inputs } => StepKind::Upload {
            uses,
            inputs: substitute_map(&inputs, ctx)?,
        },
        StepKind::Command {
            run,
            shell,
            working_directory,
        } => StepKind::Command {
            run: expr::substitute(&run, ctx)?,
            shell,
            working_directory: working_directory
                .map(|wd| expr::substitute(&wd, ctx))
                .transpose()?,
        },
        other => other,
    })
}

fn substitute_map(
    map: &BTreeMap<String, String>,
    ctx: &ExprContext,
) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), expr::substitute(v, ctx)?)))
        .collect()
}
