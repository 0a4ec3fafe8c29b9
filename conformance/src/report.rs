//! Report lines and summary for a conformance run.

use crate::run::CaseResult;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl ReportSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

pub fn summarize(results: &[CaseResult]) -> ReportSummary {
    let passed = results.iter().filter(|result| result.passed()).count();
    ReportSummary {
        total: results.len(),
        passed,
        failed: results.len() - passed,
    }
}

/// One line per case: `pass <id> [<outcome>]` or `FAIL <id>: <mismatches>`.
pub fn case_line(result: &CaseResult) -> String {
    if result.passed() {
        format!("pass {} [{}]", result.id, result.observed.as_str())
    } else {
        format!("FAIL {}: {}", result.id, result.failures.join("; "))
    }
}

pub fn summary_line(summary: &ReportSummary) -> String {
    format!(
        "conformance: total={} passed={} failed={}",
        summary.total, summary.passed, summary.failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Outcome;

    fn result(id: &str, failures: &[&str]) -> CaseResult {
        CaseResult {
            id: id.to_string(),
            observed: Outcome::Applied,
            failures: failures.iter().map(|failure| (*failure).to_string()).collect(),
        }
    }

    #[test]
    fn summarizes_pass_and_fail_counts() {
        let results = vec![result("a", &[]), result("b", &["expected conflict, stream applied"])];
        let summary = summarize(&results);
        assert_eq!(
            summary,
            ReportSummary {
                total: 2,
                passed: 1,
                failed: 1,
            }
        );
        assert!(!summary.all_passed());
        assert_eq!(summary_line(&summary), "conformance: total=2 passed=1 failed=1");
        assert_eq!(case_line(&results[0]), "pass a [applied]");
        assert_eq!(
            case_line(&results[1]),
            "FAIL b: expected conflict, stream applied"
        );
    }
}
