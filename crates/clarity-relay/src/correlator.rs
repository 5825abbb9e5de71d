//! Pairing of outbound requests with unordered inbound responses.
//!
//! The queue is insertion-ordered and matched by identifier with a linear
//! scan; expected concurrency is small. Responses may arrive in any order
//! relative to submission, so no FIFO pairing is assumed. When two pending
//! entries share an identifier the first inserted is matched first,
//! regardless of which response was meant for which caller.

use std::sync::mpsc::{self, Receiver, SyncSender};

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::RelayError;
use crate::protocol::{RequestId, response_id};

/// Log target for correlation events.
const CORRELATOR_TARGET: &str = "clarity_relay::correlator";

/// Terminal outcome delivered to a waiting caller, exactly once.
pub(crate) type Outcome = Result<Value, RelayError>;

/// One in-flight request awaiting its response.
struct PendingRequest {
    /// Process-unique token so a timeout evicts its own entry even when
    /// identifiers are duplicated.
    token: u64,
    id: RequestId,
    resolver: SyncSender<Outcome>,
}

/// Insertion-ordered collection of pending requests.
///
/// Owned by the relay's single state lock; every mutation here happens under
/// that lock, which makes resolution, timeout eviction, and crash draining
/// atomic with respect to each other and to new submissions.
#[derive(Default)]
pub(crate) struct RequestQueue {
    entries: Vec<PendingRequest>,
    next_token: u64,
}

impl RequestQueue {
    /// Registers a pending entry and returns its eviction token and the
    /// receiving half the caller parks on.
    pub(crate) fn register(&mut self, id: RequestId) -> (u64, Receiver<Outcome>) {
        let token = self.next_token;
        self.next_token += 1;

        let (resolver, receiver) = mpsc::sync_channel(1);
        self.entries.push(PendingRequest {
            token,
            id,
            resolver,
        });
        (token, receiver)
    }

    /// Number of currently pending requests.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Handles one complete line of worker stdout.
    ///
    /// Lines that do not parse as JSON objects carrying an `id` are
    /// diagnostic output, logged and dropped. A parsed identifier with no
    /// matching entry is dropped silently; it may belong to a request that
    /// already timed out.
    pub(crate) fn handle_line(&mut self, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(target: CORRELATOR_TARGET, %line, "worker diagnostic line");
            return;
        };
        let Some(id) = response_id(&value) else {
            debug!(target: CORRELATOR_TARGET, %line, "worker message without request id");
            return;
        };

        match self.take_first_match(&id) {
            Some(entry) => {
                trace!(target: CORRELATOR_TARGET, id = %id, "matched response to pending request");
                // The receiver may already have given up; nothing to do then.
                let _ = entry.resolver.send(Ok(value));
            }
            None => {
                trace!(
                    target: CORRELATOR_TARGET,
                    id = %id,
                    "dropping response with no pending request"
                );
            }
        }
    }

    /// Removes the entry registered under `token`, if still pending.
    ///
    /// Returns `false` when the entry was already resolved or drained; the
    /// caller must then drain its channel for the raced outcome.
    pub(crate) fn evict(&mut self, token: u64) -> bool {
        match self.entries.iter().position(|entry| entry.token == token) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Fails every pending entry with the supplied error and clears the queue.
    pub(crate) fn drain_with(&mut self, error: impl Fn() -> RelayError) {
        for entry in self.entries.drain(..) {
            let _ = entry.resolver.send(Err(error()));
        }
    }

    /// Removes the first entry whose identifier matches exactly.
    fn take_first_match(&mut self, id: &RequestId) -> Option<PendingRequest> {
        let index = self.entries.iter().position(|entry| entry.id == *id)?;
        Some(self.entries.remove(index))
    }
}
