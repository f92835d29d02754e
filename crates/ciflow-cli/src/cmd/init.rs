use anyhow::Context;
use ciflow_core::{config::Config, io, paths, templates};
use std::path::Path;

/// Entries kept out of version control.
const GITIGNORE_ENTRIES: [&str; 2] = [".ciflow/work/", ".ciflow/runs/"];

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing ciflow in: {}", root.display());

    // 1. .ciflow/ and config.yaml
    let dir = paths::ciflow_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    // 2. Workflow and setup action, never overwritten
    let action_file = format!("{}/action.yml", paths::DEFAULT_SETUP_ACTION_DIR);
    let files = [
        (paths::DEFAULT_WORKFLOW, templates::DEFAULT_WORKFLOW_YAML),
        (action_file.as_str(), templates::DEFAULT_SETUP_ACTION_YAML),
    ];
    for (rel, content) in files {
        let written = io::write_if_missing(&root.join(rel), content.as_bytes())
            .with_context(|| format!("failed to write {rel}"))?;
        if written {
            println!("  created: {rel}");
        } else {
            println!("  exists:  {rel}");
        }
    }

    // 3. .gitignore
    for entry in GITIGNORE_ENTRIES {
        io::ensure_gitignore_entry(root, entry).context("failed to update .gitignore")?;
    }

    println!("\nciflow initialized.");
    println!("Next: ciflow plan, then ciflow run");

    Ok(())
}
