use std::time::Instant;

use async_trait::async_trait;
use gantry_core::{CommandKind, Resolution};

use super::{resolve, run_tools, sequence_failure, Check, CheckContext, ToolRun};
use crate::report::{CheckCategory, CheckOutcome};

/// Lint / vet / format checks. A missing tool passes with a note.
#[derive(Debug, Default)]
pub struct StaticAnalysisCheck;

#[async_trait]
impl Check for StaticAnalysisCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Static
    }

    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let start = Instant::now();
        let category = self.category();

        let invocations = match resolve(ctx, CommandKind::StaticCheck) {
            Resolution::Skip { reason } => {
                return CheckOutcome::pass(category, format!("not checked: {reason}"), start.elapsed())
            }
            Resolution::Run(invs) => invs,
        };

        match run_tools(category, &invocations, ctx, start).await {
            ToolRun::Finished(seq) if seq.success => {
                CheckOutcome::pass(category, seq.output, start.elapsed())
            }
            ToolRun::Finished(seq) => sequence_failure(category, seq, start),
            ToolRun::Missing(reason) => {
                CheckOutcome::pass(category, format!("not checked: {reason}"), start.elapsed())
            }
            ToolRun::Failed(outcome) => outcome,
        }
    }
}
