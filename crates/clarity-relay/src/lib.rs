//! Persistent-worker relay for the Clarity PPM bridge.
//!
//! The crate keeps a long-lived bridge worker process alive, pipes
//! newline-delimited JSON requests to its stdin, and pairs asynchronous,
//! unordered response lines back to waiting callers by identifier. It owns
//! three concerns: the [`LineFramer`] reassembling messages from chunked
//! reads, the request correlator matching responses to pending callers, and
//! the supervisor driving the worker's spawn/ready/crash/restart lifecycle.
//! Worker processes sit behind the [`WorkerSpawner`] seam so tests can
//! inject a scripted in-memory worker instead of spawning real ones.
#![deny(missing_docs)]

mod config;
mod correlator;
mod error;
mod framer;
mod protocol;
mod supervisor;
mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{
    DEFAULT_EXIT_POLL_INTERVAL, DEFAULT_READY_MARKER, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_RESTART_DELAY, WorkerConfig,
};
pub use error::RelayError;
pub use framer::LineFramer;
pub use protocol::{RequestId, RpcRequest};
pub use supervisor::{Relay, WorkerState};
pub use worker::{ExitReport, SystemSpawner, WorkerProcess, WorkerSpawner};
