//! The production executor: every job gets its own directory under the
//! configured work dir, a fresh `git clone` of the project, and real
//! processes for every step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::process::Command;

use ciflow_core::action::{self, CompositeAction};
use ciflow_core::config::Config;
use ciflow_core::expr::{self, Context, ExprContext};
use ciflow_core::plan::{self, JobInstance, PlannedStep};
use ciflow_core::record::StepFailure;
use ciflow_core::trigger::Trigger;
use ciflow_core::workflow::{StepKind, UploadSpec};

use crate::coverage::{self, CoverageUploader};
use crate::executor::{JobEnv, StepExecutor, StepOutcome, StepResult};
use crate::process::{self, ProcessOutput, Shell};
use crate::{Result, RunnerError};

// ─── LocalExecutor ────────────────────────────────────────────────────────

pub struct LocalExecutor {
    /// Repository jobs are cloned from.
    repo: PathBuf,
    work_dir: PathBuf,
    config: Config,
    keep_workspaces: bool,
    uploader: CoverageUploader,
}

impl LocalExecutor {
    pub fn new(root: &Path, config: &Config) -> Result<Self> {
        Ok(Self {
            repo: root.to_path_buf(),
            work_dir: config.work_dir(root),
            keep_workspaces: config.runner.keep_workspaces,
            uploader: CoverageUploader::new(&config.coverage)?,
            config: config.clone(),
        })
    }

    pub fn keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }

    // ─── Secrets ──────────────────────────────────────────────────────────

    /// Bind every `secrets.*` referenced by `texts` to its host variable.
    /// Unset secrets evaluate to the empty string.
    fn secrets_for<'t>(&self, texts: impl IntoIterator<Item = &'t str>) -> ExprContext {
        let mut values = BTreeMap::new();
        for text in texts {
            let Ok(refs) = expr::references(text) else {
                continue;
            };
            for r in refs.into_iter().filter(|r| r.context == Context::Secrets) {
                if values.contains_key(&r.property) {
                    continue;
                }
                let var = self.config.secret_env(&r.property);
                let value = std::env::var(var).unwrap_or_else(|_| {
                    tracing::warn!(secret = %r.property, var, "secret is not set; using ''");
                    String::new()
                });
                values.insert(r.property, value);
            }
        }
        ExprContext::new().bind(Context::Secrets, values)
    }

    fn render(&self, text: &str) -> Result<String> {
        Ok(expr::substitute(text, &self.secrets_for([text]))?)
    }

    fn render_map(&self, map: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        let ctx = self.secrets_for(map.values().map(String::as_str));
        map.iter()
            .map(|(k, v)| Ok((k.clone(), expr::substitute(v, &ctx)?)))
            .collect()
    }

    // ─── Processes ────────────────────────────────────────────────────────

    /// Run one script in the job's environment and pick up any
    /// `GITHUB_PATH` / `GITHUB_ENV` writes it made.
    async fn run_in_job(
        &self,
        env: &mut JobEnv,
        shell: Option<&str>,
        script: &str,
        working_directory: Option<&str>,
        step_env: &BTreeMap<String, String>,
    ) -> Result<ProcessOutput> {
        let shell = Shell::resolve(shell.unwrap_or(&self.config.runner.shell))?;
        let cwd = match working_directory {
            Some(wd) => env.workspace.join(wd),
            None => env.workspace.clone(),
        };
        env.reset_command_files()?;
        let vars = env.process_env(step_env)?;
        let out = process::run_script(&shell, script, &cwd, &vars, &env.job).await?;
        env.absorb_command_files()?;
        Ok(out)
    }

    async fn clone_at(&self, env: &JobEnv) -> Result<String> {
        let git = which::which("git")
            .map_err(|_| RunnerError::Process("git not found on PATH".into()))?;

        let sha = git_capture(
            &git,
            &["rev-parse", "--verify", &format!("{}^{{commit}}", env.trigger.revision())],
            &self.repo,
        )
        .await?;

        let repo = self.repo.display().to_string();
        let workspace = env.workspace.display().to_string();
        let out = process::run_program(
            &git,
            &["clone", "--quiet", "--no-checkout", repo.as_str(), workspace.as_str()],
            &env.dir,
            &env.job,
        )
        .await?;
        if !out.success() {
            return Err(RunnerError::Process(format!("git clone {}", out.describe())));
        }

        let out = process::run_program(
            &git,
            &["checkout", "--quiet", "--detach", sha.as_str()],
            &env.workspace,
            &env.job,
        )
        .await?;
        if !out.success() {
            return Err(RunnerError::Process(format!(
                "git checkout {sha} {}",
                out.describe()
            )));
        }
        Ok(sha)
    }

    async fn run_action(&self, env: &mut JobEnv, step: &PlannedStep) -> Result<Option<String>> {
        let StepKind::Composite { path, inputs } = &step.kind else {
            return Err(RunnerError::Process(format!(
                "step {} is not a setup action",
                step.index
            )));
        };

        let action = CompositeAction::load(&env.workspace.join(path.trim_start_matches("./")))?;
        let resolved = action.resolve_inputs(&self.render_map(inputs)?)?;

        let step_texts = action
            .runs
            .steps
            .iter()
            .flat_map(|s| s.run.iter().chain(s.env.values()))
            .map(String::as_str);
        let step_env = self.render_map(&step.env)?;
        let base = self
            .secrets_for(step_texts)
            .bind(Context::Github, plan::github_values(&env.trigger))
            .bind(Context::Env, env.vars.clone())
            .bind(Context::Env, step_env.clone());

        let mut shared_env: BTreeMap<String, String> =
            action::input_env(&resolved).into_iter().collect();
        shared_env.extend(step_env);

        for rendered in action.render_steps(&resolved, &base)? {
            tracing::info!(job = %env.job, "  {} › {}", action.name, rendered.name);
            let mut step_env = shared_env.clone();
            step_env.extend(rendered.env);
            let out = self
                .run_in_job(
                    env,
                    rendered.shell.as_deref(),
                    &rendered.run,
                    rendered.working_directory.as_deref(),
                    &step_env,
                )
                .await?;
            if !out.success() {
                return Ok(Some(format!("'{}' {}", rendered.name, out.describe())));
            }
        }
        Ok(None)
    }

    async fn upload_coverage(&self, env: &JobEnv, spec: &UploadSpec) -> Result<()> {
        let token = spec
            .github_token
            .as_deref()
            .ok_or_else(|| RunnerError::Coverage("no github-token provided".into()))?;

        let lcov = Path::new(&spec.path_to_lcov);
        let lcov = if lcov.is_absolute() {
            lcov.to_path_buf()
        } else {
            env.workspace.join(lcov)
        };
        let text = tokio::fs::read_to_string(&lcov).await.map_err(|e| {
            RunnerError::Coverage(format!("cannot read {}: {e}", lcov.display()))
        })?;

        let records = coverage::parse_lcov(&text)?;
        let files = coverage::source_files(&records, &env.workspace);
        let sha = env
            .vars
            .get("GITHUB_SHA")
            .map(String::as_str)
            .unwrap_or(env.trigger.revision());
        let job = self
            .uploader
            .job(token, &env.job, sha, &env.trigger.branch, files);
        self.uploader.upload(&job).await
    }
}

/// Run git and return its trimmed stdout.
async fn git_capture(git: &Path, args: &[&str], cwd: &Path) -> Result<String> {
    let out = Command::new(git)
        .args(args)
        .current_dir(cwd)
        .output()
        .await?;
    if !out.status.success() {
        return Err(RunnerError::Process(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn mismatched(step: &PlannedStep) -> StepFailure {
    StepFailure::Unsupported {
        uses: step.kind.label().to_string(),
    }
}

// ─── StepExecutor impl ────────────────────────────────────────────────────

impl StepExecutor for LocalExecutor {
    fn prepare<'a>(
        &'a self,
        run_id: &'a str,
        job: &'a JobInstance,
        trigger: &'a Trigger,
    ) -> BoxFuture<'a, Result<JobEnv>> {
        Box::pin(async move {
            if job.id.is_empty() || job.id.starts_with('.') || job.id.contains(['/', '\\']) {
                return Err(RunnerError::Process(format!(
                    "job instance id '{}' is not a safe directory name",
                    job.id
                )));
            }
            let run_dir = run_id.get(..8).unwrap_or(run_id);
            let dir = self.work_dir.join(run_dir).join(&job.id);
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir).await?;
            }
            tokio::fs::create_dir_all(&dir).await?;

            let mut env = JobEnv::new(job, trigger, dir);
            env.vars = self.render_map(&env.vars)?;
            tracing::debug!(job = %job.id, dir = %env.dir.display(), "workspace prepared");
            Ok(env)
        })
    }

    fn checkout<'a>(
        &'a self,
        env: &'a mut JobEnv,
        _step: &'a PlannedStep,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let sha = self
                .clone_at(env)
                .await
                .map_err(|e| StepFailure::Checkout {
                    message: e.to_string(),
                })?;
            tracing::info!(job = %env.job, %sha, "checked out");
            env.vars.insert("GITHUB_SHA".to_string(), sha);
            Ok(StepOutcome::exited(0))
        })
    }

    fn setup<'a>(&'a self, env: &'a mut JobEnv, step: &'a PlannedStep) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            if !matches!(step.kind, StepKind::Composite { .. }) {
                return Err(mismatched(step));
            }
            match self.run_action(env, step).await {
                Ok(None) => Ok(StepOutcome::exited(0)),
                Ok(Some(message)) => Err(StepFailure::Setup { message }),
                Err(e) => Err(StepFailure::Setup {
                    message: e.to_string(),
                }),
            }
        })
    }

    fn command<'a>(
        &'a self,
        env: &'a mut JobEnv,
        step: &'a PlannedStep,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let StepKind::Command {
                run,
                shell,
                working_directory,
            } = &step.kind
            else {
                return Err(mismatched(step));
            };

            let spawn_failure = |e: RunnerError| StepFailure::Command {
                exit_code: None,
                stderr_tail: e.to_string(),
            };
            let script = self.render(run).map_err(spawn_failure)?;
            let step_env = self.render_map(&step.env).map_err(spawn_failure)?;
            let out = self
                .run_in_job(
                    env,
                    shell.as_deref(),
                    &script,
                    working_directory.as_deref(),
                    &step_env,
                )
                .await
                .map_err(spawn_failure)?;

            match out.exit_code {
                Some(0) => Ok(StepOutcome::exited(0)),
                exit_code => Err(StepFailure::Command {
                    exit_code,
                    stderr_tail: out.stderr_tail,
                }),
            }
        })
    }

    fn upload<'a>(&'a self, env: &'a mut JobEnv, step: &'a PlannedStep) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let StepKind::Upload { inputs, .. } = &step.kind else {
                return Err(mismatched(step));
            };
            let inputs = self.render_map(inputs).map_err(|e| StepFailure::Upload {
                message: e.to_string(),
            })?;
            let spec = UploadSpec::from_inputs(&inputs);

            match self.upload_coverage(env, &spec).await {
                Ok(()) => Ok(StepOutcome::default()),
                Err(e) if !spec.fail_on_error => {
                    tracing::warn!(job = %env.job, "coverage upload failed: {e}");
                    Ok(StepOutcome::default().with_warning(format!("coverage upload failed: {e}")))
                }
                Err(e) => Err(StepFailure::Upload {
                    message: e.to_string(),
                }),
            }
        })
    }

    fn cleanup(&self, env: JobEnv) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.keep_workspaces {
                tracing::info!(job = %env.job, "workspace kept at {}", env.workspace.display());
                return Ok(());
            }
            tokio::fs::remove_dir_all(&env.dir).await?;
            // The per-run directory goes once its last job is gone.
            if let Some(run_dir) = env.dir.parent() {
                let _ = tokio::fs::remove_dir(run_dir).await;
            }
            Ok(())
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
