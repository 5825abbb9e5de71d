//! Lifecycle management for the bridge worker and the relay entry point.
//!
//! A [`Relay`] owns one supervised worker process at a time. Spawning wires
//! the worker's stdout into the line framer and correlator, watches stderr
//! for the readiness marker, and polls for termination. Every spawn is
//! stamped with a generation; background threads act only while their
//! generation is current, so a dying instance can never touch its
//! replacement's state. On death the pending queue is drained atomically
//! and a single restart is scheduled with a one-shot timer.

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::correlator::RequestQueue;
use crate::error::RelayError;
use crate::framer::LineFramer;
use crate::protocol::RpcRequest;
use crate::worker::{ExitReport, SystemSpawner, WorkerProcess, WorkerSpawner};

/// Log target for supervisor operations.
const SUPERVISOR_TARGET: &str = "clarity_relay::supervisor";

/// Readiness state of the supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// No worker has been spawned yet.
    NotStarted,
    /// The worker is spawned but has not printed its readiness marker.
    Starting,
    /// The worker accepts requests.
    Ready,
    /// The worker terminated; a restart may be pending.
    Dead,
}

impl WorkerState {
    /// Snake-case name used in logs and the health endpoint.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Dead => "dead",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State guarded by the relay's single lock.
struct RelayState {
    worker_state: WorkerState,
    /// Incremented on every spawn and on shutdown; stale generations are
    /// ignored by background threads and pending restart timers.
    generation: u64,
    stdin: Option<Box<dyn Write + Send>>,
    worker: Option<Arc<Mutex<Box<dyn WorkerProcess>>>>,
    queue: RequestQueue,
}

struct Shared {
    config: WorkerConfig,
    spawner: Arc<dyn WorkerSpawner>,
    state: Mutex<RelayState>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let worker = match self.state.lock() {
            Ok(mut state) => state.worker.take(),
            Err(poison) => poison.into_inner().worker.take(),
        };
        if let Some(worker) = worker {
            let mut worker = worker.lock().unwrap_or_else(|poison| poison.into_inner());
            if let Err(source) = worker.kill() {
                warn!(
                    target: SUPERVISOR_TARGET,
                    error = %source,
                    "failed to kill bridge worker on drop"
                );
            }
        }
    }
}

/// The relay instance: supervisor, correlator, and their shared state.
///
/// Constructed once at process start and passed to the HTTP handler layer;
/// cloning is cheap and clones share the same worker.
#[derive(Clone)]
pub struct Relay {
    shared: Arc<Shared>,
}

impl Relay {
    /// Creates a relay that spawns real worker processes.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_spawner(config, Arc::new(SystemSpawner))
    }

    /// Creates a relay with a custom worker source, used by tests to inject
    /// a scripted worker.
    #[must_use]
    pub fn with_spawner(config: WorkerConfig, spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                spawner,
                state: Mutex::new(RelayState {
                    worker_state: WorkerState::NotStarted,
                    generation: 0,
                    stdin: None,
                    worker: None,
                    queue: RequestQueue::default(),
                }),
            }),
        }
    }

    /// Spawns the supervised worker.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyRunning`] when a worker is live, or the
    /// spawn error otherwise. Spawn errors do not schedule a restart;
    /// restarts are driven solely by observed termination.
    pub fn start(&self) -> Result<(), RelayError> {
        let mut state = self.lock_state();
        if matches!(
            state.worker_state,
            WorkerState::Starting | WorkerState::Ready
        ) {
            return Err(RelayError::AlreadyRunning);
        }
        self.spawn_locked(&mut state)
    }

    /// Current readiness state of the worker.
    #[must_use]
    pub fn worker_state(&self) -> WorkerState {
        self.lock_state().worker_state
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Sends a request to the worker and waits for its matching response.
    ///
    /// The caller blocks until the response line arrives, the configured
    /// timeout elapses, or the worker dies, whichever comes first. Exactly
    /// one of those outcomes is returned.
    ///
    /// # Errors
    ///
    /// [`RelayError::NotReady`] when the worker has not signalled readiness,
    /// [`RelayError::WriteFailure`] when the request cannot be delivered,
    /// [`RelayError::Timeout`] when no response arrives in time, and
    /// [`RelayError::ProcessDied`] when the worker terminates first.
    pub fn submit(&self, request: &RpcRequest) -> Result<Value, RelayError> {
        let payload = serde_json::to_vec(request)?;
        let timeout = self.shared.config.request_timeout;

        let (token, receiver) = {
            let mut state = self.lock_state();
            if state.worker_state != WorkerState::Ready {
                return Err(RelayError::NotReady);
            }

            let (token, receiver) = state.queue.register(request.id.clone());

            // Serialized writes: the whole line goes out under the lock.
            let written = match state.stdin.as_mut() {
                Some(stdin) => stdin
                    .write_all(&payload)
                    .and_then(|()| stdin.write_all(b"\n"))
                    .and_then(|()| stdin.flush()),
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "worker stdin is closed",
                )),
            };
            if let Err(source) = written {
                state.queue.evict(token);
                return Err(RelayError::WriteFailure { source });
            }
            (token, receiver)
        };

        match receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                let mut state = self.lock_state();
                if state.queue.evict(token) {
                    Err(RelayError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    })
                } else {
                    // Resolved between the deadline and taking the lock; the
                    // outcome is already in the channel.
                    receiver.try_recv().unwrap_or(Err(RelayError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    }))
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(RelayError::ProcessDied),
        }
    }

    /// Stops the worker and fails any pending requests.
    ///
    /// No restart is scheduled; a later [`Relay::start`] may revive it.
    pub fn shutdown(&self) {
        let worker = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.worker_state = WorkerState::Dead;
            state.stdin = None;
            state.queue.drain_with(|| RelayError::ProcessDied);
            state.worker.take()
        };
        if let Some(worker) = worker {
            let mut worker = worker.lock().unwrap_or_else(|poison| poison.into_inner());
            if let Err(source) = worker.kill() {
                warn!(
                    target: SUPERVISOR_TARGET,
                    error = %source,
                    "failed to kill bridge worker during shutdown"
                );
            }
        }
        info!(target: SUPERVISOR_TARGET, "bridge worker stopped");
    }

    /// Spawns a worker instance under the held state lock.
    fn spawn_locked(&self, state: &mut RelayState) -> Result<(), RelayError> {
        state.generation += 1;
        let generation = state.generation;

        let mut worker = match self.shared.spawner.spawn(&self.shared.config) {
            Ok(worker) => worker,
            Err(source) => {
                error!(target: SUPERVISOR_TARGET, error = %source, "worker spawn failed");
                state.worker_state = WorkerState::Dead;
                return Err(source);
            }
        };

        let stdin = worker.take_stdin().ok_or_else(|| missing_stream("stdin"))?;
        let stdout = worker
            .take_stdout()
            .ok_or_else(|| missing_stream("stdout"))?;
        let stderr = worker
            .take_stderr()
            .ok_or_else(|| missing_stream("stderr"))?;

        let worker = Arc::new(Mutex::new(worker));
        state.stdin = Some(stdin);
        state.worker = Some(Arc::clone(&worker));
        state.worker_state = WorkerState::Starting;

        info!(target: SUPERVISOR_TARGET, generation, "bridge worker starting");

        let relay = self.clone();
        thread::spawn(move || relay.stdout_loop(generation, stdout));
        let relay = self.clone();
        thread::spawn(move || relay.stderr_loop(generation, stderr));
        let relay = self.clone();
        thread::spawn(move || relay.monitor_loop(generation, worker));

        Ok(())
    }

    /// Reads stdout chunks, frames them into lines, and feeds the correlator.
    fn stdout_loop(&self, generation: u64, mut stdout: Box<dyn Read + Send>) {
        let mut framer = LineFramer::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let read = match stdout.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(source) if source.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            for line in framer.feed(&chunk[..read]) {
                let mut state = self.lock_state();
                if state.generation != generation {
                    return;
                }
                state.queue.handle_line(&line);
            }
        }
    }

    /// Logs stderr diagnostics and watches for the readiness marker.
    fn stderr_loop(&self, generation: u64, stderr: Box<dyn Read + Send>) {
        let marker = self.shared.config.ready_marker.clone();
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            debug!(target: SUPERVISOR_TARGET, %line, "worker diagnostic");
            if line.contains(&marker) {
                self.mark_ready(generation);
            }
        }
    }

    fn mark_ready(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.generation == generation && state.worker_state == WorkerState::Starting {
            state.worker_state = WorkerState::Ready;
            info!(target: SUPERVISOR_TARGET, generation, "bridge worker ready");
        }
    }

    /// Polls the worker for termination and handles its death.
    fn monitor_loop(&self, generation: u64, worker: Arc<Mutex<Box<dyn WorkerProcess>>>) {
        let interval = self.shared.config.exit_poll_interval;
        loop {
            let polled = {
                let mut worker = worker.lock().unwrap_or_else(|poison| poison.into_inner());
                worker.poll_exit()
            };
            match polled {
                Ok(None) => thread::sleep(interval),
                Ok(Some(report)) => {
                    self.handle_exit(generation, report);
                    return;
                }
                Err(source) => {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        error = %source,
                        "failed to poll worker status"
                    );
                    self.handle_exit(generation, ExitReport { code: None });
                    return;
                }
            }
        }
    }

    /// Drains the queue, transitions to `Dead`, and schedules one restart.
    fn handle_exit(&self, generation: u64, report: ExitReport) {
        {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            warn!(
                target: SUPERVISOR_TARGET,
                code = ?report.code,
                pending = state.queue.len(),
                "bridge worker exited"
            );
            state.worker_state = WorkerState::Dead;
            state.stdin = None;
            state.worker = None;
            state.queue.drain_with(|| RelayError::ProcessDied);
        }

        // One-shot timer; the generation check in restart() makes a
        // shutdown or manual start cancel it.
        let relay = self.clone();
        let delay = self.shared.config.restart_delay;
        thread::spawn(move || {
            thread::sleep(delay);
            relay.restart(generation);
        });
    }

    fn restart(&self, prior_generation: u64) {
        let mut state = self.lock_state();
        if state.generation != prior_generation {
            return;
        }
        info!(target: SUPERVISOR_TARGET, "restarting bridge worker");
        if let Err(source) = self.spawn_locked(&mut state) {
            error!(target: SUPERVISOR_TARGET, error = %source, "bridge worker restart failed");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RelayState> {
        // Recover from poisoning so a panicking reader thread cannot wedge
        // the whole relay.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Relay")
            .field("state", &state.worker_state.as_str())
            .field("pending", &state.queue.len())
            .finish()
    }
}

fn missing_stream(name: &str) -> RelayError {
    RelayError::SpawnFailed {
        message: format!("failed to capture worker {name}"),
        source: std::io::Error::other(format!("no {name}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::testing::FakeSpawner;

    fn short_config() -> WorkerConfig {
        WorkerConfig::new("fake-bridge")
            .with_ready_marker("bridge ready")
            .with_request_timeout(Duration::from_millis(400))
            .with_restart_delay(Duration::from_millis(30))
            .with_exit_poll_interval(Duration::from_millis(5))
    }

    fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn ready_relay() -> (Relay, crate::testing::FakeWorkerHandle) {
        let (spawner, mut handles) = FakeSpawner::with_workers(1);
        let relay = Relay::with_spawner(short_config(), Arc::new(spawner));
        relay.start().expect("start relay");
        let handle = handles.remove(0);
        handle.emit_stderr_line("2024-05-01 12:00:00 bridge ready (db pool up)");
        assert!(
            wait_until(|| relay.worker_state() == WorkerState::Ready),
            "worker should become ready"
        );
        (relay, handle)
    }

    fn submit_in_thread(
        relay: &Relay,
        request: RpcRequest,
    ) -> thread::JoinHandle<Result<Value, RelayError>> {
        let relay = relay.clone();
        thread::spawn(move || relay.submit(&request))
    }

    #[rstest]
    fn submit_rejected_before_ready() {
        let (spawner, _handles) = FakeSpawner::with_workers(1);
        let relay = Relay::with_spawner(short_config(), Arc::new(spawner));
        relay.start().expect("start relay");

        assert_eq!(relay.worker_state(), WorkerState::Starting);
        let result = relay.submit(&RpcRequest::new(1, "ping", None));

        assert!(matches!(result, Err(RelayError::NotReady)));
        assert_eq!(relay.pending(), 0, "rejected submit must not enqueue");
    }

    #[rstest]
    fn submit_rejected_when_never_started() {
        let (spawner, _handles) = FakeSpawner::with_workers(1);
        let relay = Relay::with_spawner(short_config(), Arc::new(spawner));

        assert_eq!(relay.worker_state(), WorkerState::NotStarted);
        assert!(matches!(
            relay.submit(&RpcRequest::new(1, "ping", None)),
            Err(RelayError::NotReady)
        ));
    }

    #[rstest]
    fn second_start_is_rejected_while_live() {
        let (spawner, _handles) = FakeSpawner::with_workers(2);
        let relay = Relay::with_spawner(short_config(), Arc::new(spawner));
        relay.start().expect("first start");

        assert!(matches!(relay.start(), Err(RelayError::AlreadyRunning)));
    }

    #[rstest]
    fn resolves_submitted_request() {
        let (relay, handle) = ready_relay();

        let caller = submit_in_thread(
            &relay,
            RpcRequest::new(1, "projects.read", Some(json!({"limit": 5}))),
        );
        assert!(wait_until(|| relay.pending() == 1));

        let requests = handle.drain_requests();
        assert_eq!(requests.len(), 1);
        let wire: Value = serde_json::from_str(&requests[0]).expect("wire request is JSON");
        assert_eq!(wire.get("id"), Some(&json!(1)));
        assert_eq!(wire.get("method"), Some(&json!("projects.read")));

        handle.emit_line(r#"{"id":1,"result":{"rows":[]}}"#);
        let outcome = caller.join().expect("join caller").expect("resolved");

        assert_eq!(outcome, json!({"id": 1, "result": {"rows": []}}));
        assert_eq!(relay.pending(), 0);
    }

    #[rstest]
    fn times_out_without_response() {
        let (relay, _handle) = ready_relay();

        let result = relay.submit(&RpcRequest::new("a", "ping", None));

        let error = result.expect_err("should time out");
        assert!(matches!(error, RelayError::Timeout { .. }));
        assert!(error.to_string().contains("timeout"));
        assert_eq!(relay.pending(), 0, "queue returns to pre-submission size");
    }

    #[rstest]
    fn unmatched_response_does_not_disturb_pending() {
        let (relay, handle) = ready_relay();

        let caller = submit_in_thread(&relay, RpcRequest::new(7, "ping", None));
        assert!(wait_until(|| relay.pending() == 1));

        handle.emit_line(r#"{"id":99,"result":"stray"}"#);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(relay.pending(), 1, "stray response must not evict");

        handle.emit_line(r#"{"id":7,"result":"ok"}"#);
        let outcome = caller.join().expect("join caller").expect("resolved");
        assert_eq!(outcome.get("result"), Some(&json!("ok")));
    }

    #[rstest]
    fn numeric_and_text_ids_resolve_independently() {
        let (relay, handle) = ready_relay();

        let numeric = submit_in_thread(&relay, RpcRequest::new(1, "ping", None));
        assert!(wait_until(|| relay.pending() == 1));
        let text = submit_in_thread(&relay, RpcRequest::new("1", "ping", None));
        assert!(wait_until(|| relay.pending() == 2));

        handle.emit_line(r#"{"id":"1","result":"text"}"#);
        let outcome = text.join().expect("join text").expect("resolved");
        assert_eq!(outcome.get("result"), Some(&json!("text")));

        handle.emit_line(r#"{"id":1,"result":"numeric"}"#);
        let outcome = numeric.join().expect("join numeric").expect("resolved");
        assert_eq!(outcome.get("result"), Some(&json!("numeric")));
    }

    #[rstest]
    fn response_split_across_chunks_resolves_once() {
        let (relay, handle) = ready_relay();

        let caller = submit_in_thread(&relay, RpcRequest::new(1, "ping", None));
        assert!(wait_until(|| relay.pending() == 1));

        handle.emit_stdout(br#"{"id":1,"result""#);
        handle.emit_stdout(b":\"ok\"}\n");

        let outcome = caller.join().expect("join caller").expect("resolved");
        assert_eq!(outcome.get("result"), Some(&json!("ok")));
    }

    #[rstest]
    fn death_fails_all_pending_and_restarts() {
        let (spawner, mut handles) = FakeSpawner::with_workers(2);
        let spawn_count = spawner.spawn_count();
        let relay = Relay::with_spawner(short_config(), Arc::new(spawner));
        relay.start().expect("start relay");
        let first = handles.remove(0);
        first.emit_stderr_line("bridge ready");
        assert!(wait_until(|| relay.worker_state() == WorkerState::Ready));

        let callers: Vec<_> = (1..=3)
            .map(|id| submit_in_thread(&relay, RpcRequest::new(id, "ping", None)))
            .collect();
        assert!(wait_until(|| relay.pending() == 3));

        first.terminate(Some(1));

        for caller in callers {
            let outcome = caller.join().expect("join caller");
            assert!(matches!(outcome, Err(RelayError::ProcessDied)));
        }
        assert_eq!(relay.pending(), 0);

        // Exactly one restart comes through after the delay.
        assert!(wait_until(|| spawn_count.load(
            std::sync::atomic::Ordering::SeqCst
        ) == 2));
        assert!(wait_until(|| relay.worker_state() == WorkerState::Starting));

        let second = &handles[0];
        second.emit_stderr_line("bridge ready");
        assert!(wait_until(|| relay.worker_state() == WorkerState::Ready));
    }

    #[rstest]
    fn submit_after_death_is_rejected_not_queued() {
        let (spawner, mut handles) = FakeSpawner::with_workers(1);
        let relay = Relay::with_spawner(short_config(), Arc::new(spawner));
        relay.start().expect("start relay");
        let handle = handles.remove(0);
        handle.emit_stderr_line("bridge ready");
        assert!(wait_until(|| relay.worker_state() == WorkerState::Ready));

        handle.terminate(Some(0));
        assert!(wait_until(|| relay.worker_state() == WorkerState::Dead));

        assert!(matches!(
            relay.submit(&RpcRequest::new(1, "ping", None)),
            Err(RelayError::NotReady)
        ));
        assert_eq!(relay.pending(), 0);
    }

    #[rstest]
    fn write_failure_fails_immediately() {
        let (relay, handle) = ready_relay();
        handle.break_stdin();

        let started = Instant::now();
        let result = relay.submit(&RpcRequest::new(1, "ping", None));

        assert!(matches!(result, Err(RelayError::WriteFailure { .. })));
        assert!(
            started.elapsed() < Duration::from_millis(200),
            "write failure must not wait for the timeout"
        );
        assert_eq!(relay.pending(), 0);
    }

    #[rstest]
    fn spawn_error_does_not_schedule_restart() {
        let (spawner, _handles) = FakeSpawner::with_workers(0);
        let spawn_count = spawner.spawn_count();
        let relay = Relay::with_spawner(short_config(), Arc::new(spawner));

        assert!(matches!(relay.start(), Err(RelayError::SpawnFailed { .. })));
        assert_eq!(relay.worker_state(), WorkerState::Dead);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(
            spawn_count.load(std::sync::atomic::Ordering::SeqCst),
            1,
            "spawn errors must not trigger the restart timer"
        );
    }

    #[rstest]
    fn shutdown_fails_pending_and_cancels_restart() {
        let (spawner, mut handles) = FakeSpawner::with_workers(2);
        let spawn_count = spawner.spawn_count();
        let relay = Relay::with_spawner(short_config(), Arc::new(spawner));
        relay.start().expect("start relay");
        let handle = handles.remove(0);
        handle.emit_stderr_line("bridge ready");
        assert!(wait_until(|| relay.worker_state() == WorkerState::Ready));

        let caller = submit_in_thread(&relay, RpcRequest::new(1, "ping", None));
        assert!(wait_until(|| relay.pending() == 1));

        relay.shutdown();

        let outcome = caller.join().expect("join caller");
        assert!(matches!(outcome, Err(RelayError::ProcessDied)));
        assert_eq!(relay.worker_state(), WorkerState::Dead);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(
            spawn_count.load(std::sync::atomic::Ordering::SeqCst),
            1,
            "shutdown must cancel any pending restart"
        );
    }
}
