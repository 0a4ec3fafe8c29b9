//! Case file parsing and validation.
//!
//! Cases are TOML files pairing an agent response with the outcome the
//! protocol must produce. See `conformance/cases/` for examples.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use artifact::core::manifest::CapabilityManifest;
use artifact::core::types::ConstraintKind;
use serde::Deserialize;

/// A parsed case file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    /// Project files present before the stream is applied.
    #[serde(default)]
    pub initial: BTreeMap<String, String>,
    /// Manifest override; the WebContainer rules apply when absent.
    #[serde(default)]
    pub manifest: Option<CapabilityManifest>,
    pub expect: Expectation,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    pub description: String,
    /// Raw agent response.
    pub stream: String,
}

/// How a stream run ended.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Malformed,
    Rejected,
    Conflict,
    TargetMissing,
    InvalidDiff,
    HostFailure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Malformed => "malformed",
            Outcome::Rejected => "rejected",
            Outcome::Conflict => "conflict",
            Outcome::TargetMissing => "target_missing",
            Outcome::InvalidDiff => "invalid_diff",
            Outcome::HostFailure => "host_failure",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Expectation {
    pub outcome: Outcome,
    /// Rule expected to reject the stream.
    pub constraint: Option<ConstraintKind>,
    /// Index of the action expected to fail.
    pub action_index: Option<usize>,
    /// Expected content of these paths after a successful run.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Number of constraint warnings expected on success.
    pub warnings: Option<usize>,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("load case {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.description.trim().is_empty() {
            bail!("case.description must be non-empty");
        }
        let expect = &self.expect;
        if expect.constraint.is_some() && expect.outcome != Outcome::Rejected {
            bail!("expect.constraint requires outcome = \"rejected\"");
        }
        let applied = expect.outcome == Outcome::Applied;
        if !applied && (!expect.files.is_empty() || expect.warnings.is_some()) {
            bail!("expect.files and expect.warnings require outcome = \"applied\"");
        }
        if applied && expect.action_index.is_some() {
            bail!("expect.action_index cannot be set for outcome = \"applied\"");
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
