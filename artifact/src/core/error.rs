//! Typed protocol errors.
//!
//! Every refusal to apply an action is surfaced with enough detail for the
//! generating agent to revise its output. Indices are 0-based positions in the
//! action stream.

use thiserror::Error;

use crate::core::types::ConstraintKind;

/// Failure of a single diff or full-file application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// `hunk` is 1-based, in file order.
    #[error("hunk {hunk} does not match the current content of {path}")]
    HunkConflict { path: String, hunk: usize },

    #[error("cannot apply a diff to missing file {path}")]
    TargetMissing { path: String },

    #[error("invalid diff for {path}: {reason}")]
    InvalidDiff { path: String, reason: String },
}

/// Failure of parsing, validating or applying an action stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed action stream at byte {offset}: {reason}")]
    MalformedStream { offset: usize, reason: String },

    #[error("action {index} rejected by {kind}: {reason}")]
    ConstraintRejected {
        index: usize,
        kind: ConstraintKind,
        reason: String,
    },

    #[error("action {index}: hunk {hunk} conflicts with the current content of {path}")]
    HunkConflict {
        index: usize,
        path: String,
        hunk: usize,
    },

    #[error("action {index}: diff targets missing file {path}")]
    TargetMissing { index: usize, path: String },

    #[error("action {index}: invalid diff for {path}: {reason}")]
    InvalidDiff {
        index: usize,
        path: String,
        reason: String,
    },

    #[error("action {index}: shell command `{command}` failed: {message}")]
    ShellExecution {
        index: usize,
        command: String,
        message: String,
    },

    #[error("action {index}: host failed to write {path}: {message}")]
    FileWrite {
        index: usize,
        path: String,
        message: String,
    },
}

impl ProtocolError {
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedStream {
            offset,
            reason: reason.into(),
        }
    }

    /// Attach the stream position to an applier failure.
    pub fn from_apply(index: usize, err: ApplyError) -> Self {
        match err {
            ApplyError::HunkConflict { path, hunk } => {
                ProtocolError::HunkConflict { index, path, hunk }
            }
            ApplyError::TargetMissing { path } => ProtocolError::TargetMissing { index, path },
            ApplyError::InvalidDiff { path, reason } => ProtocolError::InvalidDiff {
                index,
                path,
                reason,
            },
        }
    }

    /// Position of the offending action, when the failure is tied to one.
    pub fn action_index(&self) -> Option<usize> {
        match self {
            ProtocolError::MalformedStream { .. } => None,
            ProtocolError::ConstraintRejected { index, .. }
            | ProtocolError::HunkConflict { index, .. }
            | ProtocolError::TargetMissing { index, .. }
            | ProtocolError::InvalidDiff { index, .. }
            | ProtocolError::ShellExecution { index, .. }
            | ProtocolError::FileWrite { index, .. } => Some(*index),
        }
    }
}

/// Invalid capability manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{rule}: invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        rule: ConstraintKind,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_errors_carry_action_index() {
        let err = ProtocolError::from_apply(
            2,
            ApplyError::HunkConflict {
                path: "a.txt".to_string(),
                hunk: 1,
            },
        );
        assert_eq!(err.action_index(), Some(2));
        assert_eq!(
            err.to_string(),
            "action 2: hunk 1 conflicts with the current content of a.txt"
        );
    }

    #[test]
    fn malformed_stream_has_no_action_index() {
        let err = ProtocolError::malformed(14, "unclosed block");
        assert_eq!(err.action_index(), None);
        assert_eq!(
            err.to_string(),
            "malformed action stream at byte 14: unclosed block"
        );
    }
}
