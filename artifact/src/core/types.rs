//! Shared deterministic types for the action protocol.
//!
//! These types define stable contracts between the parser, validator, applier
//! and continuation coordinator. They must not depend on external state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::diff_applier::ApplyOptions;
use crate::core::grammar::Grammar;

/// Working directory used by the WebContainer sandbox.
pub const DEFAULT_WORK_DIR: &str = "/home/project";

/// Payload form of a modification block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationForm {
    /// GNU unified diff against the current content.
    Diff,
    /// Complete replacement text.
    FullFile,
}

/// One project-mutating action proposed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    FileWrite {
        path: String,
        content: String,
    },
    Shell {
        command: String,
    },
    Modification {
        path: String,
        form: ModificationForm,
        payload: String,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::FileWrite { .. } => ActionKind::FileWrite,
            Action::Shell { .. } => ActionKind::Shell,
            Action::Modification { .. } => ActionKind::Modification,
        }
    }

    /// Target path for file writes and modifications.
    pub fn path(&self) -> Option<&str> {
        match self {
            Action::FileWrite { path, .. } | Action::Modification { path, .. } => Some(path),
            Action::Shell { .. } => None,
        }
    }

    /// Path for file actions, the command line for shell actions.
    pub fn target(&self) -> &str {
        match self {
            Action::FileWrite { path, .. } | Action::Modification { path, .. } => path,
            Action::Shell { command } => command,
        }
    }
}

/// Discriminator of [`Action`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FileWrite,
    Shell,
    Modification,
}

/// An action together with the byte span of the block it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedAction {
    /// Byte offset of the block's opening `<`.
    pub offset: usize,
    /// Byte offset just past the block's closing tag.
    pub end: usize,
    pub action: Action,
}

/// Metadata carried by an artifact wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactMeta {
    pub id: Option<String>,
    pub title: Option<String>,
}

/// Ordered actions decoded from one raw agent response.
///
/// Order is significant: later actions may depend on files created by
/// earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionStream {
    pub artifacts: Vec<ArtifactMeta>,
    pub actions: Vec<ParsedAction>,
    /// Non-fatal notes (skipped unknown block types).
    pub warnings: Vec<String>,
}

impl ActionStream {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().map(|parsed| &parsed.action)
    }
}

/// Sandbox capability a rule protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    NoNativeBinaries,
    PythonStdlibOnly,
    NoVcs,
    EmbeddedDbOnly,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 4] = [
        ConstraintKind::NoNativeBinaries,
        ConstraintKind::PythonStdlibOnly,
        ConstraintKind::NoVcs,
        ConstraintKind::EmbeddedDbOnly,
    ];

    /// What the sandbox lacks, phrased for the generating agent.
    pub fn hint(self) -> &'static str {
        match self {
            ConstraintKind::NoNativeBinaries => {
                "native binaries cannot be compiled or installed in the sandbox"
            }
            ConstraintKind::PythonStdlibOnly => {
                "only the Python standard library is available; packages cannot be installed"
            }
            ConstraintKind::NoVcs => "version control tools are not available in the sandbox",
            ConstraintKind::EmbeddedDbOnly => {
                "only embedded databases (SQLite, libsql) can run in the sandbox"
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintKind::NoNativeBinaries => "no_native_binaries",
            ConstraintKind::PythonStdlibOnly => "python_stdlib_only",
            ConstraintKind::NoVcs => "no_vcs",
            ConstraintKind::EmbeddedDbOnly => "embedded_db_only",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule that fired with the `warn` policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintWarning {
    pub index: usize,
    pub kind: ConstraintKind,
    pub reason: String,
}

/// Record of one action the pipeline applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedAction {
    pub index: usize,
    pub kind: ActionKind,
    /// Path for file actions, command line for shell actions.
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<ModificationForm>,
}

impl AppliedAction {
    pub fn new(index: usize, action: &Action) -> Self {
        let form = match action {
            Action::Modification { form, .. } => Some(*form),
            _ => None,
        };
        Self {
            index,
            kind: action.kind(),
            target: action.target().to_string(),
            form,
        }
    }
}

/// Explicit configuration threaded through every protocol component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Absolute root that relative action paths are resolved against.
    pub work_dir: String,
    pub grammar: Grammar,
    pub apply: ApplyOptions,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            work_dir: DEFAULT_WORK_DIR.to_string(),
            grammar: Grammar::default(),
            apply: ApplyOptions::default(),
        }
    }
}
