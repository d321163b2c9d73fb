//! Common error types for the platform plugins.
//!
//! Hardware helpers return these errors and propagate them with `?`. The
//! platform API implementations are the only place they are turned into the
//! sentinel values the SONiC framework expects.

use thiserror::Error;

/// Main error type for platform operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from sysfs, device nodes or subprocesses
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors returned by ioctl calls
    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    /// BMC HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON from the BMC or a config file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A sysfs value, register dump or tool output could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Hardware communication errors
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// External command failed
    #[error("Command failed: {0}")]
    Command(String),

    /// Operation not available on this platform
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Argument outside the accepted range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
