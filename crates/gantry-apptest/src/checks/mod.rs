//! The six validation checks.
//!
//! Each check is independent: it receives the target and its detected
//! ecosystem and always returns a [`CheckOutcome`], never an error.

mod api;
mod build;
mod performance;
mod security;
mod static_analysis;
mod unit;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use gantry_core::{
    process, CommandKind, CommandResolver, Ecosystem, FailureKind, GantryConfig, Invocation,
    ProcessError, SequenceOutput,
};
use tokio::sync::Mutex;

use crate::report::{CheckCategory, CheckOutcome};
use crate::target::AppTarget;

pub use api::{ApiCheck, ProbeResult, DEFAULT_PROBE_PATHS};
pub use build::BuildCheck;
pub use performance::{count_lines_of_code, PerformanceCheck};
pub use security::SecurityCheck;
pub use static_analysis::StaticAnalysisCheck;
pub use unit::{parse_coverage, UnitTestCheck};

/// Everything a check may consult.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub target: AppTarget,
    pub ecosystem: Ecosystem,
    pub resolver: Arc<CommandResolver>,
    pub config: GantryConfig,
}

#[async_trait]
pub trait Check: Send + Sync {
    fn category(&self) -> CheckCategory;

    async fn run(&self, ctx: &CheckContext) -> CheckOutcome;
}

/// The standard battery, in report order.
///
/// `api_lock` serializes the API phase across validations sharing it when a
/// fixed test port is configured.
pub fn default_checks(api_lock: Arc<Mutex<()>>) -> Vec<Box<dyn Check>> {
    vec![
        Box::new(BuildCheck),
        Box::new(StaticAnalysisCheck),
        Box::new(UnitTestCheck),
        Box::new(ApiCheck::new(api_lock)),
        Box::new(SecurityCheck),
        Box::new(PerformanceCheck),
    ]
}

/// Result of running resolved toolchain commands for a check.
enum ToolRun {
    Finished(SequenceOutput),
    Missing(String),
    Failed(CheckOutcome),
}

async fn run_tools(
    category: CheckCategory,
    invocations: &[Invocation],
    ctx: &CheckContext,
    start: Instant,
) -> ToolRun {
    match process::run_sequence(invocations, &ctx.target.path, ctx.config.step_timeout()).await {
        Ok(seq) => ToolRun::Finished(seq),
        Err(e) if e.kind() == FailureKind::ToolchainMissing => ToolRun::Missing(e.to_string()),
        Err(e) => ToolRun::Failed(process_failure(category, e, start)),
    }
}

fn process_failure(category: CheckCategory, err: ProcessError, start: Instant) -> CheckOutcome {
    let output = err.partial_output().to_string();
    CheckOutcome::fail(category, err.to_string(), err.kind(), start.elapsed()).with_output(output)
}

fn sequence_failure(category: CheckCategory, seq: SequenceOutput, start: Instant) -> CheckOutcome {
    let error = format!(
        "`{}` failed: {}",
        seq.failed_command.unwrap_or_default(),
        seq.failure_reason.unwrap_or_default()
    );
    CheckOutcome::fail(category, error, FailureKind::ExecutionFailure, start.elapsed())
        .with_output(seq.output)
}

fn resolve(ctx: &CheckContext, kind: CommandKind) -> gantry_core::Resolution {
    ctx.resolver.resolve(ctx.ecosystem, kind, &ctx.target.path)
}
