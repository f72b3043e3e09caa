use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use gantry_core::{CommandKind, Resolution};
use regex::Regex;

use super::{resolve, run_tools, sequence_failure, Check, CheckContext, ToolRun};
use crate::report::{CheckCategory, CheckOutcome};

/// Runs the test suite when the target has one and records coverage.
#[derive(Debug, Default)]
pub struct UnitTestCheck;

#[async_trait]
impl Check for UnitTestCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Unit
    }

    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let start = Instant::now();
        let category = self.category();

        let invocations = match resolve(ctx, CommandKind::UnitTest) {
            Resolution::Skip { reason } => {
                return CheckOutcome::skip(category, reason, start.elapsed())
            }
            Resolution::Run(invs) => invs,
        };

        match run_tools(category, &invocations, ctx, start).await {
            ToolRun::Finished(seq) => {
                let coverage = parse_coverage(&seq.output);
                let outcome = if seq.success {
                    CheckOutcome::pass(category, seq.output, start.elapsed())
                } else {
                    sequence_failure(category, seq, start)
                };
                match coverage {
                    Some(c) => outcome.with_coverage(c),
                    None => outcome,
                }
            }
            ToolRun::Missing(reason) => CheckOutcome::skip(category, reason, start.elapsed()),
            ToolRun::Failed(outcome) => outcome,
        }
    }
}

struct CoveragePatterns {
    go: Regex,
    pytest: Regex,
    jest: Regex,
}

fn patterns() -> Option<&'static CoveragePatterns> {
    static PATTERNS: OnceLock<Option<CoveragePatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(CoveragePatterns {
                go: Regex::new(r"coverage: ([\d.]+)% of statements").ok()?,
                pytest: Regex::new(r"(?m)^TOTAL\s+.*?([\d.]+)%\s*$").ok()?,
                jest: Regex::new(r"All files\s*\|\s*([\d.]+)").ok()?,
            })
        })
        .as_ref()
}

/// Extract a coverage percentage from test tool output.
///
/// Go prints one figure per package; those are averaged. pytest-cov's
/// `TOTAL` row and istanbul's `All files` row are taken as is.
pub fn parse_coverage(output: &str) -> Option<f64> {
    let pats = patterns()?;

    let go: Vec<f64> = pats
        .go
        .captures_iter(output)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    if !go.is_empty() {
        return Some(go.iter().sum::<f64>() / go.len() as f64);
    }

    [&pats.pytest, &pats.jest]
        .iter()
        .find_map(|re| re.captures(output))
        .and_then(|c| c[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_coverage_averaged() {
        let out = "=== RUN   TestA\n--- PASS: TestA\nok  \texample.com/a\t0.01s\tcoverage: 80.0% of statements\n\
                   ok  \texample.com/b\t0.01s\tcoverage: 60.0% of statements\n";
        assert_eq!(parse_coverage(out), Some(70.0));
    }

    #[test]
    fn test_pytest_cov_total() {
        let out = "Name      Stmts   Miss  Cover\n---\napp.py       20      3    85%\nTOTAL        20      3    85%\n";
        assert_eq!(parse_coverage(out), Some(85.0));
    }

    #[test]
    fn test_jest_all_files() {
        let out = "----------|---------|\nFile      | % Stmts |\nAll files |   91.3 |    80 |\n";
        assert_eq!(parse_coverage(out), Some(91.3));
    }

    #[test]
    fn test_no_coverage() {
        assert_eq!(parse_coverage("PASS\nok"), None);
    }
}
