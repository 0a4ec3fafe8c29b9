//! Orchestration of one action stream: parse, validate, apply.
//!
//! The whole stream is validated before the first action runs, so a rejected
//! action never leaves earlier ones half-applied. Actions are then applied in
//! stream order to a private copy of the project state; the caller's state is
//! only replaced by the returned outcome.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::diff_applier;
use crate::core::error::ProtocolError;
use crate::core::parser::parse_stream;
use crate::core::state::ProjectState;
use crate::core::types::{Action, ActionStream, AppliedAction, ConstraintWarning, ProtocolConfig};
use crate::core::validator::Validator;

/// Side effects of accepted actions.
///
/// The protocol core never touches the filesystem or spawns processes itself;
/// a host does it on its behalf. Tests use scripted hosts.
pub trait Host {
    /// Persist `content` at `path` (relative to the working directory).
    fn write_file(&mut self, path: &str, content: &str) -> Result<()>;
    /// Run one shell command line and wait for it to finish.
    fn run_shell(&mut self, command: &str) -> Result<()>;
}

/// Host that records operations without performing them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DryRunHost {
    pub writes: Vec<String>,
    pub commands: Vec<String>,
}

impl Host for DryRunHost {
    fn write_file(&mut self, path: &str, _content: &str) -> Result<()> {
        self.writes.push(path.to_string());
        Ok(())
    }

    fn run_shell(&mut self, command: &str) -> Result<()> {
        self.commands.push(command.to_string());
        Ok(())
    }
}

/// Result of applying a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub state: ProjectState,
    pub applied: Vec<AppliedAction>,
    /// Rules with the `warn` policy that matched.
    pub warnings: Vec<ConstraintWarning>,
    /// Blocks the parser skipped.
    pub parse_warnings: Vec<String>,
}

pub struct Pipeline {
    config: ProtocolConfig,
    validator: Validator,
}

impl Pipeline {
    pub fn new(config: ProtocolConfig, validator: Validator) -> Self {
        Self { config, validator }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Parse `text`, logging skipped blocks.
    #[instrument(skip_all, fields(bytes = text.len()))]
    pub fn parse(&self, text: &str) -> Result<ActionStream, ProtocolError> {
        let stream = parse_stream(text, &self.config)?;
        for note in &stream.warnings {
            warn!(%note, "skipped block");
        }
        debug!(
            actions = stream.len(),
            artifacts = stream.artifacts.len(),
            "parsed action stream"
        );
        Ok(stream)
    }

    /// Parse, validate and apply `text` on top of `state`.
    pub fn run<H: Host>(
        &self,
        text: &str,
        state: &ProjectState,
        host: &mut H,
    ) -> Result<ApplyOutcome, ProtocolError> {
        let stream = self.parse(text)?;
        self.apply_stream(&stream, state, host)
    }

    /// Validate and apply every action of `stream`.
    pub fn apply_stream<H: Host>(
        &self,
        stream: &ActionStream,
        state: &ProjectState,
        host: &mut H,
    ) -> Result<ApplyOutcome, ProtocolError> {
        self.apply_pending(stream, 0, state, host)
    }

    /// Validate and apply the actions of `stream` after the first
    /// `already_applied`, which the host has seen in an earlier turn.
    /// Indices in the outcome and in errors stay stream positions.
    #[instrument(skip_all, fields(actions = stream.len(), already_applied = already_applied))]
    pub fn apply_pending<H: Host>(
        &self,
        stream: &ActionStream,
        already_applied: usize,
        state: &ProjectState,
        host: &mut H,
    ) -> Result<ApplyOutcome, ProtocolError> {
        let warnings = self.validator.validate_stream(stream).inspect_err(|err| {
            warn!(%err, "stream rejected");
        })?;
        for warning in &warnings {
            warn!(
                index = warning.index,
                kind = %warning.kind,
                reason = %warning.reason,
                "constraint warning"
            );
        }

        let before = state.digest();
        let mut next = state.clone();
        let mut applied = Vec::new();
        for (index, parsed) in stream
            .actions
            .iter()
            .enumerate()
            .skip(already_applied)
        {
            self.apply_action(index, &parsed.action, &mut next, host)?;
            applied.push(AppliedAction::new(index, &parsed.action));
        }

        info!(
            applied = applied.len(),
            warnings = warnings.len(),
            before = %&before[..12],
            after = %&next.digest()[..12],
            "applied action stream"
        );
        Ok(ApplyOutcome {
            state: next,
            applied,
            warnings,
            parse_warnings: stream.warnings.clone(),
        })
    }

    /// Apply one action to `state`. On error `state` is left untouched.
    pub fn apply_action<H: Host>(
        &self,
        index: usize,
        action: &Action,
        state: &mut ProjectState,
        host: &mut H,
    ) -> Result<(), ProtocolError> {
        match action {
            Action::FileWrite { path, content } => {
                debug!(index, %path, bytes = content.len(), "write file");
                host.write_file(path, content)
                    .map_err(|err| ProtocolError::FileWrite {
                        index,
                        path: path.clone(),
                        message: format!("{err:#}"),
                    })?;
                state.insert(path.as_str(), content.as_str());
            }
            Action::Shell { command } => {
                debug!(index, %command, "run shell");
                host.run_shell(command)
                    .map_err(|err| ProtocolError::ShellExecution {
                        index,
                        command: command.clone(),
                        message: format!("{err:#}"),
                    })?;
            }
            Action::Modification {
                path,
                form,
                payload,
            } => {
                debug!(index, %path, ?form, "apply modification");
                let patched =
                    diff_applier::apply(path, state.get(path), payload, *form, &self.config.apply)
                        .map_err(|err| {
                            warn!(index, %err, "modification failed");
                            ProtocolError::from_apply(index, err)
                        })?;
                state.insert(path.as_str(), patched);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::CapabilityManifest;
    use crate::core::types::ConstraintKind;
    use crate::test_support::{
        ScriptedHost, artifact, diff_block, file_block, full_file_block, shell_block,
    };

    fn pipeline() -> Pipeline {
        let validator =
            Validator::from_manifest(&CapabilityManifest::webcontainer()).expect("validator");
        Pipeline::new(ProtocolConfig::default(), validator)
    }

    #[test]
    fn write_then_diff_yields_patched_file() {
        let text = artifact(&[
            file_block("a.txt", "hello"),
            diff_block("a.txt", "@@ -1 +1 @@\n-hello\n+hello world\n"),
        ]);
        let mut host = ScriptedHost::default();
        let outcome = pipeline()
            .run(&text, &ProjectState::new(), &mut host)
            .expect("apply");
        assert_eq!(outcome.state.get("a.txt"), Some("hello world"));
        assert_eq!(outcome.state.len(), 1);
        assert_eq!(outcome.applied.len(), 2);
        // Modifications only touch the state.
        assert_eq!(host.writes, vec![("a.txt".to_string(), "hello".to_string())]);
    }

    #[test]
    fn rejected_action_halts_before_any_side_effect() {
        let text = artifact(&[
            file_block("main.py", "print('hi')\n"),
            shell_block("pip install numpy"),
        ]);
        let mut host = ScriptedHost::default();
        let err = pipeline()
            .run(&text, &ProjectState::new(), &mut host)
            .expect_err("rejected");
        assert!(matches!(
            err,
            ProtocolError::ConstraintRejected {
                index: 1,
                kind: ConstraintKind::PythonStdlibOnly,
                ..
            }
        ));
        assert!(host.writes.is_empty());
        assert!(host.commands.is_empty());
    }

    #[test]
    fn conflicting_diff_reports_index_and_keeps_state() {
        let state: ProjectState = [("a.txt", "one\ntwo\n")].into_iter().collect();
        let text = artifact(&[
            shell_block("npm install"),
            diff_block("a.txt", "@@ -1 +1 @@\n-three\n+four\n"),
        ]);
        let err = pipeline()
            .run(&text, &state, &mut ScriptedHost::default())
            .expect_err("conflict");
        assert_eq!(
            err,
            ProtocolError::HunkConflict {
                index: 1,
                path: "a.txt".to_string(),
                hunk: 1,
            }
        );
        assert_eq!(state.get("a.txt"), Some("one\ntwo\n"));
    }

    #[test]
    fn host_failures_become_typed_errors() {
        let text = artifact(&[shell_block("npm test")]);
        let mut host = ScriptedHost::failing_commands(&["npm test"]);
        let err = pipeline()
            .run(&text, &ProjectState::new(), &mut host)
            .expect_err("shell failure");
        match err {
            ProtocolError::ShellExecution {
                index,
                command,
                message,
            } => {
                assert_eq!(index, 0);
                assert_eq!(command, "npm test");
                assert!(message.contains("scripted failure"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn pending_actions_skip_the_applied_prefix() {
        let text = artifact(&[
            file_block("a.txt", "1"),
            shell_block("npm install"),
            file_block("b.txt", "2"),
        ]);
        let pipeline = pipeline();
        let stream = pipeline.parse(&text).expect("parse");
        let mut host = ScriptedHost::default();
        let outcome = pipeline
            .apply_pending(&stream, 2, &ProjectState::new(), &mut host)
            .expect("apply");
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.applied[0].index, 2);
        assert!(host.commands.is_empty());
        assert_eq!(outcome.state.get("b.txt"), Some("2"));
    }

    #[test]
    fn streams_without_modifications_are_idempotent() {
        let text = artifact(&[
            file_block("a.txt", "x"),
            file_block("a.txt", "y"),
            shell_block("npm run build"),
        ]);
        let pipeline = pipeline();
        let start = ProjectState::new();
        let first = pipeline
            .run(&text, &start, &mut DryRunHost::default())
            .expect("first");
        let second = pipeline
            .run(&text, &first.state, &mut DryRunHost::default())
            .expect("second");
        assert_eq!(first.state, second.state);
        assert_eq!(first.state.get("a.txt"), Some("y"));
    }

    #[test]
    fn flagged_actions_are_applied_with_warnings() {
        let text = artifact(&[file_block("docker-compose.yml", "services: {}\n")]);
        let outcome = pipeline()
            .run(&text, &ProjectState::new(), &mut DryRunHost::default())
            .expect("apply");
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, ConstraintKind::EmbeddedDbOnly);
        assert!(outcome.state.contains("docker-compose.yml"));
    }

    #[test]
    fn full_file_modification_creates_absent_path_verbatim() {
        let text = artifact(&[full_file_block("src/new.js", "export const x = 1;\n")]);
        let mut host = ScriptedHost::default();
        let outcome = pipeline()
            .run(&text, &ProjectState::new(), &mut host)
            .expect("apply");
        assert_eq!(outcome.state.get("src/new.js"), Some("export const x = 1;\n"));
        assert!(host.writes.is_empty());
    }
}
