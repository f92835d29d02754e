pub mod config;
pub mod init;
pub mod plan;
pub mod run;
pub mod runs;
pub mod validate;

use anyhow::Context;
use ciflow_core::{
    config::Config,
    trigger::{EventKind, Trigger},
    workflow::Workflow,
};
use clap::Args;
use std::path::{Path, PathBuf};

/// The event a plan or run simulates.
#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Event: push or pull_request
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch pushed to, or targeted by the pull request
    #[arg(long, default_value = "master")]
    pub branch: String,
}

impl TriggerArgs {
    pub fn trigger(&self) -> anyhow::Result<Trigger> {
        let event: EventKind = self.event.parse()?;
        Ok(Trigger::new(event, self.branch.clone()))
    }
}

/// Load the config and the workflow it points at (or `workflow_override`).
pub fn load_workflow(
    root: &Path,
    workflow_override: Option<&Path>,
) -> anyhow::Result<(Config, PathBuf, Workflow)> {
    let config = Config::load(root).context("failed to load config")?;
    let path = match workflow_override {
        Some(p) => ciflow_core::paths::resolve(root, p),
        None => config.workflow_path(root),
    };
    let workflow =
        Workflow::load(&path).with_context(|| format!("failed to load {}", path.display()))?;
    Ok((config, path, workflow))
}
