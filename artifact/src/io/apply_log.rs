//! Apply logs: JSON records of one pipeline run, written on request.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::error::ProtocolError;
use crate::core::state::ProjectState;
use crate::core::types::{AppliedAction, ConstraintWarning};
use crate::pipeline::ApplyOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct ApplyLog {
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    /// Hex SHA-256 of the raw stream text.
    pub stream_sha256: String,
    pub outcome: LogOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_index: Option<usize>,
    pub applied: Vec<AppliedAction>,
    pub warnings: Vec<ConstraintWarning>,
    pub parse_warnings: Vec<String>,
    pub state_before: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_after: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Applied,
    Failed,
}

/// Captures the start of a run; [`ApplyLogRecorder::finish`] builds the log.
#[derive(Debug, Clone)]
pub struct ApplyLogRecorder {
    started_at: DateTime<Utc>,
    stream_sha256: String,
    state_before: String,
}

impl ApplyLogRecorder {
    pub fn start(stream: &str, state: &ProjectState) -> Self {
        Self {
            started_at: Utc::now(),
            stream_sha256: hex::encode(Sha256::digest(stream.as_bytes())),
            state_before: state.digest(),
        }
    }

    pub fn finish(self, result: &Result<ApplyOutcome, ProtocolError>) -> ApplyLog {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - self.started_at)
            .num_milliseconds()
            .try_into()
            .unwrap_or(0);
        let mut log = ApplyLog {
            started_at: self.started_at.to_rfc3339(),
            ended_at: ended_at.to_rfc3339(),
            duration_ms,
            stream_sha256: self.stream_sha256,
            outcome: LogOutcome::Applied,
            error: None,
            failed_index: None,
            applied: Vec::new(),
            warnings: Vec::new(),
            parse_warnings: Vec::new(),
            state_before: self.state_before,
            state_after: None,
        };
        match result {
            Ok(outcome) => {
                log.applied = outcome.applied.clone();
                log.warnings = outcome.warnings.clone();
                log.parse_warnings = outcome.parse_warnings.clone();
                log.state_after = Some(outcome.state.digest());
            }
            Err(err) => {
                log.outcome = LogOutcome::Failed;
                log.error = Some(err.to_string());
                log.failed_index = err.action_index();
            }
        }
        log
    }
}

pub fn write_apply_log(path: &Path, log: &ApplyLog) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(log).context("serialize apply log")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write apply log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, ConstraintKind};

    #[test]
    fn successful_run_records_digests_and_actions() {
        let before = ProjectState::new();
        let recorder = ApplyLogRecorder::start("stream", &before);
        let after: ProjectState = [("a.txt", "hello")].into_iter().collect();
        let outcome = ApplyOutcome {
            state: after.clone(),
            applied: vec![AppliedAction::new(
                0,
                &Action::FileWrite {
                    path: "a.txt".to_string(),
                    content: "hello".to_string(),
                },
            )],
            warnings: Vec::new(),
            parse_warnings: Vec::new(),
        };
        let log = recorder.finish(&Ok(outcome));
        assert_eq!(log.outcome, LogOutcome::Applied);
        assert_eq!(log.state_before, before.digest());
        assert_eq!(log.state_after, Some(after.digest()));
        assert_eq!(log.stream_sha256.len(), 64);

        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/apply.json");
        write_apply_log(&path, &log).expect("write");
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["applied"][0]["kind"], "file_write");
        assert!(written.get("error").is_none());
    }

    #[test]
    fn failed_run_records_error_and_index() {
        let recorder = ApplyLogRecorder::start("stream", &ProjectState::new());
        let log = recorder.finish(&Err(ProtocolError::ConstraintRejected {
            index: 3,
            kind: ConstraintKind::NoVcs,
            reason: "git".to_string(),
        }));
        assert_eq!(log.outcome, LogOutcome::Failed);
        assert_eq!(log.failed_index, Some(3));
        assert!(log.state_after.is_none());
    }
}
