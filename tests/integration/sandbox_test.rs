//! Integration tests for the sandbox pipeline.
//!
//! These tests are implemented in:
//! `crates/airlock-runtime/tests/e2e_test.rs`
//!
//! Covered scenarios:
//! - `pipeline_scout_registration`: SCOUT_CONNECT over the carrier socket
//! - `pipeline_open_returns_a_working_fd`: forwarded open, byte-for-byte read
//! - `pipeline_access_missing_path_reports_enoent`: -ENOENT propagation
//! - `pipeline_hello_produces_no_reply_and_keeps_the_scout`: liveness probe
//! - `pipeline_stop_frame_ends_the_loop`: STOP_MSG_LOOP self-message
//! - `pipeline_hangup_removes_the_scout`: EPOLLRDHUP teardown
//! - `mission_true_exits_zero` (ignored): full fork/inject/exec round trip
