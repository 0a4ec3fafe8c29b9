//! Case execution: run the stream through the pipeline and judge the result.

use anyhow::{Context, Result};
use artifact::core::error::ProtocolError;
use artifact::core::manifest::CapabilityManifest;
use artifact::core::state::ProjectState;
use artifact::core::types::{ConstraintKind, ProtocolConfig};
use artifact::core::validator::Validator;
use artifact::pipeline::{ApplyOutcome, DryRunHost, Pipeline};
use tracing::{debug, instrument};

use crate::case::{CaseFile, Outcome};

/// Judged result of one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseResult {
    pub id: String,
    pub observed: Outcome,
    /// Mismatches between expectation and observation; empty means pass.
    pub failures: Vec<String>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run one case with a dry-run host.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(case: &CaseFile) -> Result<CaseResult> {
    let manifest = case
        .manifest
        .clone()
        .unwrap_or_else(CapabilityManifest::webcontainer);
    let validator = Validator::from_manifest(&manifest).context("compile case manifest")?;
    let pipeline = Pipeline::new(ProtocolConfig::default(), validator);
    let initial = ProjectState::from(case.initial.clone());

    let result = pipeline.run(&case.case.stream, &initial, &mut DryRunHost::default());
    let observed = match &result {
        Ok(_) => Outcome::Applied,
        Err(err) => classify(err),
    };
    debug!(?observed, "case finished");

    let failures = judge(case, &result);
    Ok(CaseResult {
        id: case.case.id.clone(),
        observed,
        failures,
    })
}

fn classify(err: &ProtocolError) -> Outcome {
    match err {
        ProtocolError::MalformedStream { .. } => Outcome::Malformed,
        ProtocolError::ConstraintRejected { .. } => Outcome::Rejected,
        ProtocolError::HunkConflict { .. } => Outcome::Conflict,
        ProtocolError::TargetMissing { .. } => Outcome::TargetMissing,
        ProtocolError::InvalidDiff { .. } => Outcome::InvalidDiff,
        ProtocolError::ShellExecution { .. } | ProtocolError::FileWrite { .. } => {
            Outcome::HostFailure
        }
    }
}

fn judge(case: &CaseFile, result: &Result<ApplyOutcome, ProtocolError>) -> Vec<String> {
    let expect = &case.expect;
    let mut failures = Vec::new();
    match result {
        Ok(outcome) => {
            if expect.outcome != Outcome::Applied {
                failures.push(format!("expected {}, stream applied", expect.outcome.as_str()));
                return failures;
            }
            for (path, want) in &expect.files {
                match outcome.state.get(path) {
                    Some(got) if got == want => {}
                    Some(got) => failures.push(format!("{path}: expected {want:?}, got {got:?}")),
                    None => failures.push(format!("{path}: missing from final state")),
                }
            }
            if let Some(want) = expect.warnings
                && outcome.warnings.len() != want
            {
                failures.push(format!(
                    "expected {want} warnings, got {}",
                    outcome.warnings.len()
                ));
            }
        }
        Err(err) => {
            let observed = classify(err);
            if expect.outcome != observed {
                failures.push(format!(
                    "expected {}, got {}: {err}",
                    expect.outcome.as_str(),
                    observed.as_str()
                ));
                return failures;
            }
            if let Some(want) = expect.constraint {
                let got = rejected_by(err);
                if got != Some(want) {
                    failures.push(format!("expected rejection by {want}, got {got:?}"));
                }
            }
            if let Some(want) = expect.action_index
                && err.action_index() != Some(want)
            {
                failures.push(format!(
                    "expected failure at action {want}, got {:?}",
                    err.action_index()
                ));
            }
        }
    }
    failures
}

fn rejected_by(err: &ProtocolError) -> Option<ConstraintKind> {
    match err {
        ProtocolError::ConstraintRejected { kind, .. } => Some(*kind),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(toml: &str) -> CaseFile {
        CaseFile::parse_str(toml).expect("case")
    }

    #[test]
    fn passing_case_has_no_failures() {
        let result = run_case(&case(
            r#"
[case]
id = "hello"
description = "write then diff"
stream = """
<boltArtifact id="x" title="X">
<boltAction type="file" filePath="a.txt">hello</boltAction>
<boltAction type="modification" filePath="a.txt"><diff>
@@ -1 +1 @@
-hello
+hello world
</diff></boltAction>
</boltArtifact>
"""

[expect]
outcome = "applied"

[expect.files]
"a.txt" = "hello world"
"#,
        ))
        .expect("run");
        assert!(result.passed(), "{:?}", result.failures);
        assert_eq!(result.observed, Outcome::Applied);
    }

    #[test]
    fn mismatched_outcome_is_reported() {
        let result = run_case(&case(
            r#"
[case]
id = "expects-conflict"
description = "actually applies"
stream = '<boltAction type="file" filePath="a.txt">x</boltAction>'

[expect]
outcome = "conflict"
"#,
        ))
        .expect("run");
        assert!(!result.passed());
        assert_eq!(result.failures, vec!["expected conflict, stream applied"]);
    }

    #[test]
    fn wrong_rejection_rule_is_reported() {
        let result = run_case(&case(
            r#"
[case]
id = "git"
description = "git is rejected by no_vcs"
stream = '<boltAction type="shell">git init</boltAction>'

[expect]
outcome = "rejected"
constraint = "python_stdlib_only"
"#,
        ))
        .expect("run");
        assert_eq!(result.observed, Outcome::Rejected);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].contains("python_stdlib_only"));
    }
}
