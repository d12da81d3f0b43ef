//! Error types for the WinDbg bridge
//!
//! Error messages are designed to be clear and actionable for LLM agents,
//! with hints on how to resolve common issues.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the WinDbg bridge
#[derive(Error, Debug)]
pub enum Error {
    // === Validation Errors ===
    #[error("Invalid command syntax: {0}")]
    InvalidSyntax(String),

    #[error("Command is not safe for execution: {0}")]
    UnsafeCommand(String),

    #[error("Invalid command or parameters: {0}")]
    InvalidInput(String),

    // === Transport Errors ===
    #[error("WinDbg extension not found on pipe '{0}'. Make sure the extension is loaded in WinDbg")]
    PipeNotFound(String),

    #[error("WinDbg extension is busy on pipe '{0}' and the connect timeout was exceeded")]
    PipeBusy(String),

    #[error("The pipe is being closed by the WinDbg extension")]
    PipeClosing,

    #[error("Pipe connection broken: {0}")]
    PipeBroken(String),

    #[error("Failed to talk to WinDbg extension: {0}")]
    Transport(String),

    // === Timeout Errors ===
    #[error("{operation} timed out after {ms}ms")]
    Timeout { operation: String, ms: u64 },

    #[error("Timeout waiting for available connection after {0}ms. All pooled connections are busy")]
    PoolTimeout(u64),

    // === Protocol Errors ===
    #[error("Failed to serialize message: {0}")]
    Encoding(String),

    #[error("Invalid response from WinDbg extension: {0}")]
    Decoding(String),

    #[error("Invalid response structure from WinDbg extension: {0}")]
    InvalidResponse(String),

    // === Extension Errors ===
    #[error("WinDbg command failed: {0}")]
    CommandFailed(String),

    #[error("Network debugging connection issue: {0}")]
    NetworkDebugging(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy used for retry and recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or unsafe input, never retried
    Validation,
    /// Channel-level failure (broken, busy, closing, not found)
    Transport,
    /// A deadline expired
    Timeout,
    /// Bytes on the wire could not be encoded or decoded
    Protocol,
    /// The extension answered, but reported an error
    Extension,
    /// Everything else
    Internal,
}

impl Error {
    /// Create a timeout error for the named operation
    pub fn timeout(operation: &str, ms: u64) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            ms,
        }
    }

    /// Classify this error into the bridge's error taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidSyntax(_) | Error::UnsafeCommand(_) | Error::InvalidInput(_) => {
                ErrorClass::Validation
            }
            Error::PipeNotFound(_)
            | Error::PipeBusy(_)
            | Error::PipeClosing
            | Error::PipeBroken(_)
            | Error::Transport(_)
            | Error::Io(_) => ErrorClass::Transport,
            Error::Timeout { .. } | Error::PoolTimeout(_) => ErrorClass::Timeout,
            Error::Encoding(_) | Error::Decoding(_) | Error::InvalidResponse(_) | Error::Json(_) => {
                ErrorClass::Protocol
            }
            Error::CommandFailed(_) | Error::NetworkDebugging(_) => ErrorClass::Extension,
            Error::Config(_) | Error::ConfigParse(_) | Error::FileRead { .. } | Error::Internal(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Whether the peer is tearing down the pipe.
    ///
    /// This is the signal that every pooled handle is poisoned and the
    /// whole pool has to be rebuilt.
    pub fn is_pipe_closing(&self) -> bool {
        match self {
            Error::PipeClosing => true,
            Error::Io(e) => e.raw_os_error() == Some(232),
            other => other.to_string().to_lowercase().contains("pipe is being closed"),
        }
    }

    /// Whether the Communication Manager may retry after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self.class(), ErrorClass::Validation | ErrorClass::Extension)
            && !matches!(self, Error::Encoding(_))
    }
}
