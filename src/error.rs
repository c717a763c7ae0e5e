use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("{tool} exited with status {status} (log: {log})")]
    ExternalTool {
        tool: String,
        status: String,
        log: String,
    },

    #[error("{tool} finished but did not produce {path}")]
    MissingOutput { tool: String, path: String },

    #[error("correspondence error: {0}")]
    Correspondence(String),

    #[error("missing group: {0}")]
    MissingGroup(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, KiraError::Cancelled)
    }
}
