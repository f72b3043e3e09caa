use std::time::Instant;

use async_trait::async_trait;
use gantry_core::{verify_manifest, CommandKind, FailureKind, Resolution};

use super::{resolve, run_tools, sequence_failure, Check, CheckContext, ToolRun};
use crate::report::{CheckCategory, CheckOutcome};

/// Install dependencies / compile. Skips when there is no manifest.
#[derive(Debug, Default)]
pub struct BuildCheck;

#[async_trait]
impl Check for BuildCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Build
    }

    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let start = Instant::now();
        let category = self.category();

        // a broken manifest is a defect even when the toolchain is absent
        if let Err(e) = verify_manifest(ctx.ecosystem, &ctx.target.path) {
            return CheckOutcome::fail(
                category,
                e.to_string(),
                FailureKind::ExecutionFailure,
                start.elapsed(),
            );
        }

        let invocations = match resolve(ctx, CommandKind::Build) {
            Resolution::Skip { reason } => {
                return CheckOutcome::skip(category, reason, start.elapsed())
            }
            Resolution::Run(invs) => invs,
        };

        match run_tools(category, &invocations, ctx, start).await {
            ToolRun::Finished(seq) if seq.success => {
                CheckOutcome::pass(category, seq.output, start.elapsed())
            }
            ToolRun::Finished(seq) => sequence_failure(category, seq, start),
            ToolRun::Missing(reason) => CheckOutcome::skip(category, reason, start.elapsed()),
            ToolRun::Failed(outcome) => outcome,
        }
    }
}
