use std::time::Instant;

use async_trait::async_trait;
use gantry_core::{scan_tree, FailureKind};
use serde_json::json;

use super::{Check, CheckContext};
use crate::report::{CheckCategory, CheckOutcome};

/// Pattern scan for concatenated queries and literal secrets.
#[derive(Debug, Default)]
pub struct SecurityCheck;

#[async_trait]
impl Check for SecurityCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Security
    }

    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let start = Instant::now();
        let root = ctx.target.path.clone();
        let eco = ctx.ecosystem;

        let findings = match tokio::task::spawn_blocking(move || scan_tree(&root, eco)).await {
            Ok(findings) => findings,
            Err(e) => {
                return CheckOutcome::fail(
                    self.category(),
                    format!("security scan aborted: {e}"),
                    FailureKind::EngineFault,
                    start.elapsed(),
                )
            }
        };

        let report = findings
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let details = json!({ "findings": findings });

        if findings.is_empty() {
            CheckOutcome::pass(self.category(), "no findings", start.elapsed()).with_details(details)
        } else {
            CheckOutcome::fail(
                self.category(),
                format!("{} potential security issue(s) found", findings.len()),
                FailureKind::ExecutionFailure,
                start.elapsed(),
            )
            .with_output(report)
            .with_details(details)
        }
    }
}
