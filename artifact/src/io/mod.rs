//! I/O helpers for `artifact` commands.

pub mod apply_log;
pub mod config;
pub mod directive;
pub mod host;
pub mod manifest;
pub mod process;
pub mod snapshot;
