//! HTTP relay daemon for the Clarity PPM bridge worker.
//!
//! `clarity-relayd` supervises the bridge worker as a child process and
//! exposes it to tool-calling clients over two routes: `POST /rpc` forwards
//! a JSON-RPC style body and returns the worker's matched response, and
//! `GET /health` reports readiness and the pending-queue depth.
#![deny(missing_docs)]

pub mod cli;
pub mod http;
