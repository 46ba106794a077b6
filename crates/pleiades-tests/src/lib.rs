//! End-to-end tests for the pleiades ingest pipeline
//!
//! The tests run the coordinator against a scripted SSE server from
//! `pleiades_sse::testing`, with either a file sink in a temporary directory
//! or a log sink backed by the in-memory broker. No external services are
//! needed.
//!
//! ```bash
//! cargo test -p pleiades-tests
//! ```
//!
//! # Test Structure
//!
//! - `pipeline_e2e_test.rs` - Full pipeline runs, restarts and resume

// This crate only contains tests, no library code
