//! Scripted in-memory worker for exercising the relay without real processes.
//!
//! [`FakeSpawner`] hands out pre-built [`FakeWorkerHandle`]s, one per
//! scripted spawn, through which a test pushes stdout/stderr bytes, inspects
//! the request lines the relay wrote, and triggers termination. Enabled for
//! this crate's own tests and, behind the `test-support` feature, for
//! dependent crates' tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

use crate::config::WorkerConfig;
use crate::error::RelayError;
use crate::worker::{ExitReport, WorkerProcess, WorkerSpawner};

enum PipeMsg {
    Data(Vec<u8>),
    Eof,
}

/// Blocking reader fed from a channel; `Eof` or a dropped sender reads as 0.
struct PipeReader {
    rx: Receiver<PipeMsg>,
    pending: VecDeque<u8>,
    closed: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            if self.closed {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(PipeMsg::Data(data)) => self.pending.extend(data),
                Ok(PipeMsg::Eof) | Err(_) => {
                    self.closed = true;
                    return Ok(0);
                }
            }
        }
        let count = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

/// Writer that forwards chunks to the test and can be broken on demand.
struct PipeWriter {
    tx: Sender<Vec<u8>>,
    broken: Arc<AtomicBool>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin broken"));
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Test-side handle to one scripted worker instance.
pub struct FakeWorkerHandle {
    stdout_tx: Sender<PipeMsg>,
    stderr_tx: Sender<PipeMsg>,
    stdin_rx: Receiver<Vec<u8>>,
    exit: Arc<Mutex<Option<ExitReport>>>,
    stdin_broken: Arc<AtomicBool>,
}

impl FakeWorkerHandle {
    /// Pushes raw bytes onto the worker's stdout.
    pub fn emit_stdout(&self, bytes: &[u8]) {
        let _ = self.stdout_tx.send(PipeMsg::Data(bytes.to_vec()));
    }

    /// Pushes one newline-terminated line onto the worker's stdout.
    pub fn emit_line(&self, line: &str) {
        self.emit_stdout(format!("{line}\n").as_bytes());
    }

    /// Pushes one diagnostic line onto the worker's stderr.
    pub fn emit_stderr_line(&self, line: &str) {
        let _ = self.stderr_tx.send(PipeMsg::Data(format!("{line}\n").into_bytes()));
    }

    /// Collects the request lines written to the worker's stdin so far.
    #[must_use]
    pub fn drain_requests(&self) -> Vec<String> {
        let mut bytes = Vec::new();
        while let Ok(chunk) = self.stdin_rx.try_recv() {
            bytes.extend(chunk);
        }
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Makes subsequent stdin writes fail with a broken-pipe error.
    pub fn break_stdin(&self) {
        self.stdin_broken.store(true, Ordering::SeqCst);
    }

    /// Marks the worker as exited and closes its output streams.
    pub fn terminate(&self, code: Option<i32>) {
        *self.exit.lock().unwrap_or_else(|poison| poison.into_inner()) =
            Some(ExitReport { code });
        let _ = self.stdout_tx.send(PipeMsg::Eof);
        let _ = self.stderr_tx.send(PipeMsg::Eof);
    }
}

/// The relay-side half of a scripted worker.
struct FakeWorker {
    stdin: Option<Box<dyn Write + Send>>,
    stdout: Option<Box<dyn Read + Send>>,
    stderr: Option<Box<dyn Read + Send>>,
    stdout_tx: Sender<PipeMsg>,
    stderr_tx: Sender<PipeMsg>,
    exit: Arc<Mutex<Option<ExitReport>>>,
}

impl WorkerProcess for FakeWorker {
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stderr.take()
    }

    fn poll_exit(&mut self) -> io::Result<Option<ExitReport>> {
        Ok(*self.exit.lock().unwrap_or_else(|poison| poison.into_inner()))
    }

    fn kill(&mut self) -> io::Result<()> {
        *self.exit.lock().unwrap_or_else(|poison| poison.into_inner()) =
            Some(ExitReport { code: None });
        let _ = self.stdout_tx.send(PipeMsg::Eof);
        let _ = self.stderr_tx.send(PipeMsg::Eof);
        Ok(())
    }
}

fn fake_worker_pair() -> (FakeWorker, FakeWorkerHandle) {
    let (stdout_tx, stdout_rx) = channel();
    let (stderr_tx, stderr_rx) = channel();
    let (stdin_tx, stdin_rx) = channel();
    let exit = Arc::new(Mutex::new(None));
    let stdin_broken = Arc::new(AtomicBool::new(false));

    let worker = FakeWorker {
        stdin: Some(Box::new(PipeWriter {
            tx: stdin_tx,
            broken: Arc::clone(&stdin_broken),
        })),
        stdout: Some(Box::new(PipeReader {
            rx: stdout_rx,
            pending: VecDeque::new(),
            closed: false,
        })),
        stderr: Some(Box::new(PipeReader {
            rx: stderr_rx,
            pending: VecDeque::new(),
            closed: false,
        })),
        stdout_tx: stdout_tx.clone(),
        stderr_tx: stderr_tx.clone(),
        exit: Arc::clone(&exit),
    };
    let handle = FakeWorkerHandle {
        stdout_tx,
        stderr_tx,
        stdin_rx,
        exit,
        stdin_broken,
    };
    (worker, handle)
}

/// Spawner yielding a fixed script of fake workers, then spawn failures.
pub struct FakeSpawner {
    workers: Mutex<VecDeque<FakeWorker>>,
    spawn_count: Arc<AtomicUsize>,
}

impl FakeSpawner {
    /// Builds a spawner scripted with `count` workers and the handles that
    /// control them, in spawn order.
    #[must_use]
    pub fn with_workers(count: usize) -> (Self, Vec<FakeWorkerHandle>) {
        let mut workers = VecDeque::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            let (worker, handle) = fake_worker_pair();
            workers.push_back(worker);
            handles.push(handle);
        }
        (
            Self {
                workers: Mutex::new(workers),
                spawn_count: Arc::new(AtomicUsize::new(0)),
            },
            handles,
        )
    }

    /// Counter of spawn attempts, shared with the spawner.
    #[must_use]
    pub fn spawn_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.spawn_count)
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(&self, _config: &WorkerConfig) -> Result<Box<dyn WorkerProcess>, RelayError> {
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        self.workers
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .pop_front()
            .map(|worker| Box::new(worker) as Box<dyn WorkerProcess>)
            .ok_or_else(|| RelayError::SpawnFailed {
                message: "no scripted worker remaining".to_owned(),
                source: io::Error::other("fake spawner exhausted"),
            })
    }
}
