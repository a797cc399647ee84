// ABOUTME: Error types for the container engine
// ABOUTME: Covers runtime failures, archive transport errors, and missing archive entries

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Docker API errors surfaced by the bollard adapter
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Runtime errors from non-Docker runtimes or test doubles
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Container does not exist in the runtime
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Requested file was absent from a copy-out archive
    #[error("Entry {name} not found in archive copied from {path}")]
    EntryNotFound { name: String, path: String },

    /// Malformed tar data or an unencodable entry
    #[error("Archive error: {0}")]
    Archive(String),

    /// Exit signal fired while the operation was in flight
    #[error("Operation cancelled")]
    Cancelled,

    /// Exec session could not be attached
    #[error("Exec attach failed: {0}")]
    ExecAttach(String),

    /// Log multiplexer is no longer accepting generations
    #[error("Log stream closed")]
    LogStreamClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that return EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
