//! Lifecycle events are emitted with their structured fields.

use gantry_core::{
    emit_check_finished, emit_run_finished, emit_run_started, emit_step_finished,
    emit_validation_finished, run_span,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_run_started_logs_pipeline_and_repository() {
    emit_run_started("run-123", "ci_cd", "acme/widgets");

    assert!(logs_contain("run.started"));
    assert!(logs_contain("acme/widgets"));
}

#[traced_test]
#[test]
fn test_emit_run_finished_logs_duration() {
    emit_run_finished("run-456", 5000, 3, true);

    assert!(logs_contain("run.finished"));
    assert!(logs_contain("duration_ms=5000"));
}

#[traced_test]
#[test]
fn test_failed_step_is_logged_at_warn() {
    emit_step_finished("run-789", "build", false, false, 12);

    assert!(logs_contain("WARN"));
    assert!(logs_contain("step.finished"));
}

#[traced_test]
#[test]
fn test_check_and_validation_events() {
    emit_check_finished("todo-api", "security", "fail", 40);
    emit_validation_finished("todo-api", "failure", 4, 1, 1);

    assert!(logs_contain("check.finished"));
    assert!(logs_contain("validation.finished"));
}

#[traced_test]
#[test]
fn test_run_span_tags_nested_events() {
    let span = run_span("span-run-42", "ci").entered();
    tracing::info!("inside run");
    drop(span);

    assert!(logs_contain("span-run-42"));
}
