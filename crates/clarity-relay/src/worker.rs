//! Process seam between the supervisor and the worker it manages.
//!
//! The supervisor talks to the worker through [`WorkerProcess`] and obtains
//! instances through [`WorkerSpawner`], so tests can inject a scripted
//! in-memory worker instead of spawning a real process. The production
//! implementation, [`SystemSpawner`], wraps [`std::process::Command`].

use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::config::WorkerConfig;
use crate::error::RelayError;

/// Log target for process spawning.
const WORKER_TARGET: &str = "clarity_relay::worker";

/// Observed termination of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// The exit code, when the platform reports one.
    pub code: Option<i32>,
}

/// A spawned worker process with three independent byte streams.
pub trait WorkerProcess: Send {
    /// Takes ownership of the worker's stdin writer. Yields `Some` once.
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>>;

    /// Takes ownership of the worker's stdout reader. Yields `Some` once.
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Takes ownership of the worker's stderr reader. Yields `Some` once.
    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Checks for termination without blocking.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the process status cannot be queried.
    fn poll_exit(&mut self) -> io::Result<Option<ExitReport>>;

    /// Forcibly terminates the worker.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the kill signal cannot be delivered.
    fn kill(&mut self) -> io::Result<()>;
}

/// Source of worker processes.
pub trait WorkerSpawner: Send + Sync {
    /// Spawns a worker for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BinaryNotFound`] when the executable does not
    /// exist and [`RelayError::SpawnFailed`] for other spawn failures.
    fn spawn(&self, config: &WorkerConfig) -> Result<Box<dyn WorkerProcess>, RelayError>;
}

/// Spawner backed by real operating-system processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl WorkerSpawner for SystemSpawner {
    fn spawn(&self, config: &WorkerConfig) -> Result<Box<dyn WorkerProcess>, RelayError> {
        debug!(
            target: WORKER_TARGET,
            command = %config.command.display(),
            args = ?config.args,
            "spawning bridge worker process"
        );

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                RelayError::BinaryNotFound {
                    command: config.command.display().to_string(),
                    source,
                }
            } else {
                RelayError::SpawnFailed {
                    message: format!("failed to start {}", config.command.display()),
                    source,
                }
            }
        })?;

        debug!(
            target: WORKER_TARGET,
            pid = child.id(),
            "bridge worker process spawned"
        );

        Ok(Box::new(SystemWorker { child }))
    }
}

/// Worker handle wrapping a [`Child`].
struct SystemWorker {
    child: Child,
}

impl WorkerProcess for SystemWorker {
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as Box<dyn Write + Send>)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as Box<dyn Read + Send>)
    }

    fn poll_exit(&mut self) -> io::Result<Option<ExitReport>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ExitReport {
                code: status.code(),
            }))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        // Reap immediately so no zombie outlives the supervisor.
        self.child.wait().map(|_| ())
    }
}
