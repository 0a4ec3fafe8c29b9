//! Capability manifest: which sandbox rules are enforced and how they match.
//!
//! The default manifest describes the WebContainer sandbox. Each rule can be
//! tuned from TOML; a field left out of a rule's table keeps that rule's
//! built-in value.

use serde::{Deserialize, Serialize};

use crate::core::types::ConstraintKind;

/// What happens when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Abort the stream at the offending action.
    Reject,
    /// Record a warning and keep going.
    Warn,
}

/// Host-supplied settings for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSpec {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    /// Regexes matched against each shell command segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_patterns: Option<Vec<String>>,
    /// Regexes matched against file write paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_patterns: Option<Vec<String>>,
    /// Regexes matched against file write content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_patterns: Option<Vec<String>>,
}

impl Default for RuleSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: None,
            command_patterns: None,
            path_patterns: None,
            content_patterns: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityManifest {
    pub no_native_binaries: RuleSpec,
    pub python_stdlib_only: RuleSpec,
    pub no_vcs: RuleSpec,
    pub embedded_db_only: RuleSpec,
}

/// A rule with every field filled in from the manifest or the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRule {
    pub kind: ConstraintKind,
    pub policy: Policy,
    pub command_patterns: Vec<String>,
    pub path_patterns: Vec<String>,
    pub content_patterns: Vec<String>,
}

impl CapabilityManifest {
    /// The WebContainer sandbox: no native binaries, stdlib-only Python,
    /// no version control, embedded databases only.
    pub fn webcontainer() -> Self {
        Self::default()
    }

    pub fn spec(&self, kind: ConstraintKind) -> &RuleSpec {
        match kind {
            ConstraintKind::NoNativeBinaries => &self.no_native_binaries,
            ConstraintKind::PythonStdlibOnly => &self.python_stdlib_only,
            ConstraintKind::NoVcs => &self.no_vcs,
            ConstraintKind::EmbeddedDbOnly => &self.embedded_db_only,
        }
    }

    fn spec_mut(&mut self, kind: ConstraintKind) -> &mut RuleSpec {
        match kind {
            ConstraintKind::NoNativeBinaries => &mut self.no_native_binaries,
            ConstraintKind::PythonStdlibOnly => &mut self.python_stdlib_only,
            ConstraintKind::NoVcs => &mut self.no_vcs,
            ConstraintKind::EmbeddedDbOnly => &mut self.embedded_db_only,
        }
    }

    /// Enabled rules in a stable order.
    pub fn rules(&self) -> Vec<ResolvedRule> {
        ConstraintKind::ALL
            .into_iter()
            .filter(|kind| self.spec(*kind).enabled)
            .map(|kind| self.resolve(kind))
            .collect()
    }

    pub fn resolve(&self, kind: ConstraintKind) -> ResolvedRule {
        let spec = self.spec(kind);
        let defaults = default_rule(kind);
        ResolvedRule {
            kind,
            policy: spec.policy.unwrap_or(defaults.policy),
            command_patterns: spec
                .command_patterns
                .clone()
                .unwrap_or(defaults.command_patterns),
            path_patterns: spec.path_patterns.clone().unwrap_or(defaults.path_patterns),
            content_patterns: spec
                .content_patterns
                .clone()
                .unwrap_or(defaults.content_patterns),
        }
    }

    /// Copy with every default written out, as `artifact init` stores it.
    pub fn explicit(&self) -> Self {
        let mut out = self.clone();
        for kind in ConstraintKind::ALL {
            let resolved = self.resolve(kind);
            let spec = out.spec_mut(kind);
            spec.policy = Some(resolved.policy);
            spec.command_patterns = Some(resolved.command_patterns);
            spec.path_patterns = Some(resolved.path_patterns);
            spec.content_patterns = Some(resolved.content_patterns);
        }
        out
    }
}

fn patterns(list: &[&str]) -> Vec<String> {
    list.iter().map(|pattern| (*pattern).to_string()).collect()
}

/// Built-in matching for the WebContainer sandbox.
pub fn default_rule(kind: ConstraintKind) -> ResolvedRule {
    let (policy, commands, paths, contents): (Policy, &[&str], &[&str], &[&str]) = match kind {
        ConstraintKind::NoNativeBinaries => (
            Policy::Reject,
            &[
                r"^(apt|apt-get|aptitude|yum|dnf|apk|pacman|zypper|brew|port|snap)(\s|$)",
                r"^(gcc|g\+\+|cc|c\+\+|clang|clang\+\+|ld|make|cmake|ninja|meson|rustc|cargo|go|javac|gfortran|node-gyp|swiftc)(\s|$)",
            ],
            &[],
            &[],
        ),
        ConstraintKind::PythonStdlibOnly => (
            Policy::Reject,
            &[
                r"^pip[0-9.]*(\s+-\S+)*\s+install(\s|$)",
                r"^python[0-9.]*(\s+-\S+)*\s+-m\s*pip(\s+-\S+)*\s+install(\s|$)",
                r"^(poetry|pipenv|pdm)\s+(add|install)(\s|$)",
                r"^(conda|mamba|micromamba)(\s+-\S+)*\s+install(\s|$)",
                r"^uv(\s+-\S+)*\s+(add|pip(\s+-\S+)*\s+install)(\s|$)",
                r"^easy_install(\s|$)",
            ],
            &[],
            &[],
        ),
        ConstraintKind::NoVcs => (
            Policy::Reject,
            &[r"^(git|hg|svn|bzr|fossil|darcs)(\s|$)", r"^gh(\s|$)"],
            &[],
            &[],
        ),
        ConstraintKind::EmbeddedDbOnly => (
            Policy::Warn,
            &[r"^(postgres|pg_ctl|initdb|mysqld|mongod|redis-server)(\s|$)"],
            &[
                r"(^|/)docker-compose\.ya?ml$",
                r"(^|/)compose\.ya?ml$",
                r"(^|/)(postgresql|my|mongod|redis)\.conf$",
            ],
            &[r"(?i)\b(postgres(ql)?|mysql|mariadb|mongodb(\+srv)?|redis)://"],
        ),
    };
    ResolvedRule {
        kind,
        policy,
        command_patterns: patterns(commands),
        path_patterns: patterns(paths),
        content_patterns: patterns(contents),
    }
}
