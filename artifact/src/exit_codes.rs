//! Stable exit codes for `artifact` CLI commands.

use crate::core::error::ProtocolError;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, config or manifest, or an I/O failure.
pub const INVALID: i32 = 1;
/// The action stream could not be parsed.
pub const MALFORMED: i32 = 2;
/// An action violated a sandbox constraint.
pub const REJECTED: i32 = 3;
/// A modification or host operation could not be applied.
pub const APPLY_FAILED: i32 = 4;
/// The stream is truncated and needs a continuation.
pub const INCOMPLETE: i32 = 5;

/// Exit code for a protocol failure.
pub fn for_error(err: &ProtocolError) -> i32 {
    match err {
        ProtocolError::MalformedStream { .. } => MALFORMED,
        ProtocolError::ConstraintRejected { .. } => REJECTED,
        ProtocolError::HunkConflict { .. }
        | ProtocolError::TargetMissing { .. }
        | ProtocolError::InvalidDiff { .. }
        | ProtocolError::ShellExecution { .. }
        | ProtocolError::FileWrite { .. } => APPLY_FAILED,
    }
}
