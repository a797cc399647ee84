// ABOUTME: Error types for the staging, run, and export workflows
// ABOUTME: Wraps engine failures and adds configuration and exit-status errors

use forge_engine::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Invalid application configuration such as an unparsable quota
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to encode services: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Staging failed with status {status}")]
    StagingFailed { status: i64 },

    #[error("Export container failed with status {status}")]
    ExportFailed { status: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ForgeError>;
