use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] ciflow_core::CiError),

    #[error("Process error: {0}")]
    Process(String),

    #[error("No usable shell for '{0}'")]
    ShellNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Coverage error: {0}")]
    Coverage(String),
}
