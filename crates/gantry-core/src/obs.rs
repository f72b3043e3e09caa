//! Structured lifecycle events for pipeline runs and validations.
//!
//! Every event carries an `event` field so log pipelines can filter on it:
//! `run.started`, `run.finished`, `step.finished`, `check.finished` and
//! `validation.finished`.

use tracing::{info, warn};

/// Span tagging every event of one pipeline run.
///
/// Attach it to the run's future with `tracing::Instrument` so the run can
/// move between worker threads.
///
/// ```ignore
/// engine_run.instrument(run_span("3f2b...", "ci_cd")).await
/// ```
pub fn run_span(run_id: &str, pipeline: &str) -> tracing::Span {
    tracing::info_span!("gantry.run", run_id = %run_id, pipeline = %pipeline)
}

/// Span tagging every event of one validation.
pub fn validation_span(app: &str) -> tracing::Span {
    tracing::info_span!("gantry.validate", app = %app)
}

pub fn emit_run_started(run_id: &str, pipeline: &str, repository: &str) {
    info!(event = "run.started", run_id = %run_id, pipeline = %pipeline, repository = %repository);
}

/// Emit event: run finished with duration, number of executed steps and status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, steps_run: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        steps_run = steps_run,
        success = success,
    );
}

/// Emit event: one pipeline step completed. Failures are logged at warn.
pub fn emit_step_finished(run_id: &str, step: &str, success: bool, skipped: bool, duration_ms: u64) {
    if success {
        info!(event = "step.finished", run_id = %run_id, step = %step, success, skipped, duration_ms);
    } else {
        warn!(event = "step.finished", run_id = %run_id, step = %step, success, skipped, duration_ms);
    }
}

pub fn emit_check_finished(app: &str, category: &str, status: &str, duration_ms: u64) {
    info!(event = "check.finished", app = %app, category = %category, status = %status, duration_ms);
}

/// Emit event: validation report finalized.
pub fn emit_validation_finished(app: &str, overall: &str, passed: usize, failed: usize, skipped: usize) {
    info!(
        event = "validation.finished",
        app = %app,
        overall = %overall,
        passed,
        failed,
        skipped,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_create() {
        let _run = run_span("test-run-id", "ci").entered();
        let _validation = validation_span("todo-api").entered();
    }
}
