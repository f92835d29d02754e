mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, run::RunArgs, runs::RunsSubcommand, TriggerArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ciflow",
    about = "Run the PyNotify CI workflow locally",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .ciflow/ or .git/)
    #[arg(long, global = true, env = "CIFLOW_ROOT")]
    root: Option<PathBuf>,

    /// Workflow file (default: `workflow` from .ciflow/config.yaml)
    #[arg(long, global = true)]
    workflow: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config, workflow and setup action
    Init,

    /// Check the workflow for structural errors
    Validate,

    /// Show the job instances a trigger would run
    Plan {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Only plan these jobs (repeatable)
        #[arg(long = "job", value_name = "ID")]
        jobs: Vec<String>,
    },

    /// Execute the workflow
    Run(RunArgs),

    /// Inspect recorded runs
    Runs {
        #[command(subcommand)]
        subcommand: RunsSubcommand,
    },

    /// Show or validate .ciflow/config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let workflow = cli.workflow.as_deref();

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Validate => cmd::validate::run(&root, workflow, cli.json),
        Commands::Plan { trigger, jobs } => {
            cmd::plan::run(&root, workflow, &trigger, &jobs, cli.json)
        }
        Commands::Run(args) => cmd::run::run(&root, workflow, args, cli.json),
        Commands::Runs { subcommand } => cmd::runs::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
