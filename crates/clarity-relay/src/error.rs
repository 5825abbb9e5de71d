//! Error types for the bridge worker relay.

use std::io;

use thiserror::Error;

/// Errors raised while relaying requests to the bridge worker.
///
/// Every variant is terminal for the request that triggered it; the relay
/// never retries on the caller's behalf. [`RelayError::ProcessDied`] is the
/// only kind with systemic remediation (the supervisor schedules a restart).
#[derive(Debug, Error)]
pub enum RelayError {
    /// The worker has not yet signalled readiness on its diagnostic stream.
    #[error("bridge worker is not ready")]
    NotReady,

    /// A worker is already live; only one supervised instance may run.
    #[error("bridge worker is already running")]
    AlreadyRunning,

    /// No response arrived within the configured window.
    #[error("request timeout after {timeout_secs}s")]
    Timeout {
        /// The timeout duration in seconds.
        timeout_secs: u64,
    },

    /// The worker terminated before a response was matched.
    #[error("bridge worker process died")]
    ProcessDied,

    /// The request could not be delivered to the worker's stdin.
    #[error("failed to write request to bridge worker: {source}")]
    WriteFailure {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The worker executable was not found.
    #[error("bridge worker binary not found: {command}")]
    BinaryNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to spawn the worker process.
    #[error("failed to spawn bridge worker: {message}")]
    SpawnFailed {
        /// Description of the spawn failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
