use thiserror::Error;

#[derive(Debug, Error)]
pub enum CiError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("invalid step {index} in job '{job}': {reason}")]
    InvalidStep {
        job: String,
        index: usize,
        reason: String,
    },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("matrix for job '{0}' expands to no combinations")]
    EmptyMatrix(String),

    #[error("invalid matrix for job '{job}': {reason}")]
    InvalidMatrix { job: String, reason: String },

    #[error("unknown event '{0}': expected push or pull_request")]
    UnknownEvent(String),

    #[error("expression error in '{expr}': {reason}")]
    Expression { expr: String, reason: String },

    #[error("composite action not found at {0}")]
    ActionNotFound(String),

    #[error("invalid composite action: {0}")]
    InvalidAction(String),

    #[error("missing required input '{input}' for action '{action}'")]
    MissingInput { action: String, input: String },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("ambiguous run id prefix '{0}'")]
    AmbiguousRun(String),

    #[error("invalid run id '{0}': expected a run id or id prefix")]
    InvalidRunId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CiError>;
