//! CLI error types

use thiserror::Error;

/// CLI error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Blueprint error: {0}")]
    Blueprint(#[from] approval_engine::BlueprintError),

    #[error("Configuration error: {0}")]
    Config(#[from] approval_engine::ConfigError),

    #[error("Approval error: {0}")]
    Approval(#[from] approval_types::ApprovalError),

    /// The blueprint loaded but failed validation
    #[error("blueprint has {0} problem(s)")]
    InvalidBlueprint(usize),

    #[error("Script error: {0}")]
    Script(String),
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
