//! Deterministic, pure logic for the action protocol.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and project state and return deterministic outputs suitable for tests.

pub mod continuation;
pub mod dedent;
pub mod diff_applier;
pub mod error;
pub mod grammar;
pub mod manifest;
pub mod parser;
pub mod state;
pub mod types;
pub mod unified_diff;
pub mod validator;
