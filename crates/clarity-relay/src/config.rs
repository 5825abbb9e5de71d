//! Configuration for the supervised bridge worker.

use std::path::PathBuf;
use std::time::Duration;

/// Marker substring the worker prints to stderr once its own startup
/// (including the downstream PPM database connection) has completed.
pub const DEFAULT_READY_MARKER: &str = "clarity bridge ready";

/// Window a submitted request waits for its matching response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before the single restart attempt scheduled after a worker death.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Interval at which the supervisor polls the worker for termination.
pub const DEFAULT_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for spawning and supervising the bridge worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// The executable path or command name.
    pub command: PathBuf,
    /// Arguments to pass to the worker.
    pub args: Vec<String>,
    /// Working directory for the spawned process.
    pub working_dir: Option<PathBuf>,
    /// Stderr substring that signals readiness.
    pub ready_marker: String,
    /// Per-request response timeout.
    pub request_timeout: Duration,
    /// Delay before the restart attempt after a crash.
    pub restart_delay: Duration,
    /// Exit-polling interval for the worker monitor.
    pub exit_poll_interval: Duration,
}

impl WorkerConfig {
    /// Creates a configuration with default timings for the given command.
    #[must_use]
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            ready_marker: DEFAULT_READY_MARKER.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            restart_delay: DEFAULT_RESTART_DELAY,
            exit_poll_interval: DEFAULT_EXIT_POLL_INTERVAL,
        }
    }

    /// Sets the worker arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a custom working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the readiness marker substring.
    #[must_use]
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    /// Sets the per-request response timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the crash-restart delay.
    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Sets the exit-polling interval.
    #[must_use]
    pub fn with_exit_poll_interval(mut self, interval: Duration) -> Self {
        self.exit_poll_interval = interval;
        self
    }
}
