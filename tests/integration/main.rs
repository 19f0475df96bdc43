//! Integration test binary: all integration tests in a single binary.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]


mod backend_contract;
mod persistence;
mod session_flow;
