//! Artifact action protocol: parse, validate and apply agent-proposed actions.
//!
//! A content-generation agent answers with prose interleaved with tagged
//! action blocks (file writes, shell commands, diff or full-file
//! modifications). This crate turns that text into an ordered action stream,
//! rejects actions the sandbox cannot run, and applies the rest to a project
//! tree. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, constraint checks, diff
//!   application, continuation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, snapshots, shell
//!   execution, apply logs). Isolated behind the [`pipeline::Host`] seam.
//!
//! [`pipeline`] coordinates core logic with a host to implement the CLI
//! commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
