//! Command-line interface for the relay daemon.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use clarity_relay::{DEFAULT_READY_MARKER, WorkerConfig};

/// Command-line arguments accepted by `clarity-relayd`.
#[derive(Debug, Parser)]
#[command(
    name = "clarity-relayd",
    about = "HTTP relay supervising the Clarity PPM bridge worker"
)]
pub struct Cli {
    /// Address the HTTP listener binds to.
    #[arg(long, env = "CLARITY_RELAY_BIND", default_value = "127.0.0.1:8317")]
    pub bind: SocketAddr,

    /// Bridge worker executable.
    #[arg(long, env = "CLARITY_RELAY_WORKER", default_value = "clarity-bridge")]
    pub worker: PathBuf,

    /// Argument appended to the worker command line; repeatable.
    #[arg(long = "worker-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// Working directory for the worker process.
    #[arg(long, env = "CLARITY_RELAY_WORKER_DIR")]
    pub worker_dir: Option<PathBuf>,

    /// Stderr substring that signals worker readiness.
    #[arg(
        long,
        env = "CLARITY_RELAY_READY_MARKER",
        default_value = DEFAULT_READY_MARKER
    )]
    pub ready_marker: String,

    /// Per-request response timeout in seconds.
    #[arg(long, env = "CLARITY_RELAY_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Cli {
    /// Builds the worker configuration described by these arguments.
    #[must_use]
    pub fn worker_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::new(&self.worker)
            .with_args(self.worker_args.iter().cloned())
            .with_ready_marker(self.ready_marker.clone())
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs));
        if let Some(dir) = &self.worker_dir {
            config = config.with_working_dir(dir);
        }
        config
    }
}
