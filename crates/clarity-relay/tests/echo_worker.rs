//! End-to-end relay test against a real subprocess.
//!
//! The worker is a shell loop that announces readiness on stderr and echoes
//! every request line back on stdout, so each response carries the caller's
//! identifier and correlation runs over real pipes.

#![cfg(unix)]

use std::time::{Duration, Instant};

use serde_json::json;

use clarity_relay::{Relay, RpcRequest, WorkerConfig, WorkerState};

const ECHO_SCRIPT: &str =
    "echo 'clarity bridge ready' >&2; while IFS= read -r line; do printf '%s\\n' \"$line\"; done";

fn echo_config() -> WorkerConfig {
    WorkerConfig::new("sh")
        .with_args(["-c", ECHO_SCRIPT])
        .with_request_timeout(Duration::from_secs(5))
        .with_restart_delay(Duration::from_millis(50))
}

fn wait_for_state(relay: &Relay, expected: WorkerState) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if relay.worker_state() == expected {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn round_trips_requests_through_real_process() {
    let relay = Relay::new(echo_config());
    relay.start().expect("start echo worker");
    assert!(
        wait_for_state(&relay, WorkerState::Ready),
        "worker should report ready via its stderr marker"
    );

    let response = relay
        .submit(&RpcRequest::new(1, "ping", Some(json!({"probe": true}))))
        .expect("echoed response");
    assert_eq!(response.get("id"), Some(&json!(1)));
    assert_eq!(response.get("method"), Some(&json!("ping")));

    let response = relay
        .submit(&RpcRequest::new("second", "projects.read", None))
        .expect("echoed response");
    assert_eq!(response.get("id"), Some(&json!("second")));

    relay.shutdown();
    assert_eq!(relay.worker_state(), WorkerState::Dead);
}

#[test]
fn reports_missing_binary() {
    let relay = Relay::new(WorkerConfig::new("definitely-not-a-real-binary-4821"));

    let error = relay.start().expect_err("spawn should fail");
    assert!(matches!(
        error,
        clarity_relay::RelayError::BinaryNotFound { .. }
    ));
}
