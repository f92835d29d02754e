//! `ciflow-runner` executes a [`RunPlan`](ciflow_core::plan::RunPlan) on the
//! local machine.
//!
//! # Architecture
//!
//! ```text
//! RunPlan
//!     │
//!     ▼
//! Orchestrator    ← one tokio task per job instance, optional semaphore
//!     │              fail-fast within a job, jobs independent of each other
//!     ▼
//! StepExecutor    ← prepare / checkout / setup / command / upload / cleanup
//!     │
//!     ▼
//! LocalExecutor   ← git clone into a fresh workspace, composite actions and
//!                    `run` steps through the shell, Coveralls upload
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use ciflow_runner::{LocalExecutor, Orchestrator};
//!
//! let executor = LocalExecutor::new(&root, &config)?;
//! let report = Orchestrator::new(executor)
//!     .max_parallel(config.runner.max_parallel)
//!     .run(&plan)
//!     .await;
//! report.save(&root)?;
//! ```

pub mod coverage;
pub mod error;
pub mod executor;
pub mod local;
pub mod orchestrator;

pub(crate) mod process;


pub use coverage::{CoverageUploader, CoverallsJob};
pub use error::RunnerError;
pub use executor::{JobEnv, StepExecutor, StepOutcome, StepResult};
pub use local::LocalExecutor;
pub use orchestrator::Orchestrator;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, RunnerError>;
