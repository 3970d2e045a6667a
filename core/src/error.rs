//! Error types for the knockgate-core library.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for knockgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that prevent the detector from starting.
///
/// Every variant is fatal: a detector that cannot watch every configured
/// port, or whose configuration is malformed, never begins serving.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to bind a knock port.
    #[error("Failed to bind knock port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by a firewall backend.
///
/// These are never fatal. The engine logs them and keeps tracking knocks;
/// the next completed sequence issues the same intent again.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// Failed to execute the firewall command.
    #[error("Failed to execute firewall command: {0}")]
    CommandFailed(String),

    /// The firewall command ran but refused the change.
    #[error("Firewall rejected change for port {port} (exit status {status}): {stderr}")]
    Rejected {
        port: u16,
        status: i32,
        stderr: String,
    },

    /// The backend did not answer in time and the call was abandoned.
    #[error("Firewall change for port {port} timed out after {after:?}")]
    TimedOut { port: u16, after: Duration },
}
