use std::path::PathBuf;

use thiserror::Error;

/// Problems found while validating configuration at the boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

#[derive(Error, Debug)]
pub enum XdistError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker manager `{action}` failed (exit code {exit_code:?}): {stderr}")]
    ManagerFailed {
        action: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Worker manager reported success but {0} was not written")]
    MissingState(PathBuf),

    #[error("No installed Django pin found in `{0}` output")]
    DjangoPinNotFound(String),

    #[error("Package introspection failed: {0}")]
    PinLookupFailed(String),

    #[error("Cancelled during {0}")]
    Cancelled(&'static str),

    #[error("Cannot quote bootstrap command for the shell: {0}")]
    Quote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, XdistError>;
