//! Result of a complete pipeline run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use gantry_core::FailureKind;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::runner::StepOutcome;

/// Metadata key holding the digest of the pipeline's ordered step names.
pub const META_DEFINITION_DIGEST: &str = "definition_digest";
/// Metadata key holding the detected ecosystem, when a step detected one.
pub const META_ECOSYSTEM: &str = "ecosystem";

/// Outcome of one `execute` call. Handed to the caller; the engine keeps no copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,

    pub pipeline: String,

    /// AND of all step outcomes.
    pub success: bool,

    /// Error of the first failing step, or the engine fault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,

    /// Outcomes in execution order; a prefix of the pipeline's steps.
    pub steps: Vec<StepOutcome>,

    pub duration_ms: u64,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    pub context: RunContext,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RunResult {
    /// A result for a run that could not start.
    pub fn aborted(
        run_id: String,
        pipeline: &str,
        context: RunContext,
        error: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            run_id,
            pipeline: pipeline.to_string(),
            success: false,
            error: Some(error),
            error_kind: Some(FailureKind::EngineFault),
            steps: Vec::new(),
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            started_at,
            finished_at,
            context,
            metadata: BTreeMap::new(),
        }
    }

    /// Number of steps that ran and passed.
    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.success && !s.skipped).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.steps.iter().filter(|s| s.skipped).count()
    }

    /// Number of steps that failed.
    pub fn failed_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.success).count()
    }

    /// Human-readable one-line-per-step rendering.
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "pipeline {} ({}) {} in {}ms\n",
            self.pipeline,
            self.run_id,
            if self.success { "succeeded" } else { "failed" },
            self.duration_ms
        );
        for step in &self.steps {
            let status = match (step.success, step.skipped) {
                (_, true) => "skip",
                (true, false) => "pass",
                (false, _) => "FAIL",
            };
            out.push_str(&format!("  [{status}] {} ({}ms)", step.name, step.duration_ms));
            if let Some(err) = &step.error {
                out.push_str(&format!(": {err}"));
            } else if step.skipped {
                out.push_str(&format!(": {}", step.output));
            }
            out.push('\n');
        }
        if let Some(err) = &self.error {
            out.push_str(&format!("error: {err}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(steps: Vec<StepOutcome>) -> RunResult {
        let now = Utc::now();
        RunResult {
            run_id: "run123".to_string(),
            pipeline: "ci".to_string(),
            success: steps.iter().all(|s| s.success),
            error: None,
            error_kind: None,
            steps,
            duration_ms: 300,
            started_at: now,
            finished_at: now,
            context: RunContext::default(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_run_result_counts() {
        let r = result(vec![
            StepOutcome::passed("fetch", String::new(), Duration::from_millis(100)),
            StepOutcome::skipped("build", "no manifest".into(), Duration::ZERO),
            StepOutcome::failed(
                "test",
                String::new(),
                "exit status 1".into(),
                FailureKind::ExecutionFailure,
                Duration::from_millis(200),
            ),
        ]);

        assert_eq!(r.passed_count(), 1);
        assert_eq!(r.skipped_count(), 1);
        assert_eq!(r.failed_count(), 1);
        assert!(!r.success);
    }

    #[test]
    fn test_render_text() {
        let r = result(vec![
            StepOutcome::passed("fetch", String::new(), Duration::from_millis(100)),
            StepOutcome::skipped("build", "no go.mod found".into(), Duration::ZERO),
        ]);
        let text = r.render_text();
        assert!(text.contains("succeeded"));
        assert!(text.contains("[pass] fetch"));
        assert!(text.contains("[skip] build (0ms): no go.mod found"));
    }

    #[test]
    fn test_aborted_result() {
        let r = RunResult::aborted(
            "id".into(),
            "nope",
            RunContext::default(),
            "pipeline 'nope' not found".into(),
            Utc::now(),
        );
        assert!(!r.success);
        assert!(r.steps.is_empty());
        assert_eq!(r.error_kind, Some(FailureKind::EngineFault));

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["error_kind"], "engine_fault");
    }
}
