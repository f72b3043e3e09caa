//! Check outcomes and the aggregated validation report.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gantry_core::{Ecosystem, FailureKind};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The six fixed validation dimensions, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Build,
    Static,
    Unit,
    Api,
    Security,
    Performance,
}

impl CheckCategory {
    pub const ALL: [CheckCategory; 6] = [
        CheckCategory::Build,
        CheckCategory::Static,
        CheckCategory::Unit,
        CheckCategory::Api,
        CheckCategory::Security,
        CheckCategory::Performance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckCategory::Build => "build",
            CheckCategory::Static => "static",
            CheckCategory::Unit => "unit",
            CheckCategory::Api => "api",
            CheckCategory::Security => "security",
            CheckCategory::Performance => "performance",
        }
    }

    /// Display name used in summaries.
    pub fn title(&self) -> &'static str {
        match self {
            CheckCategory::Build => "Build",
            CheckCategory::Static => "Static Analysis",
            CheckCategory::Unit => "Unit Tests",
            CheckCategory::Api => "API Smoke Test",
            CheckCategory::Security => "Security Scan",
            CheckCategory::Performance => "Performance Metrics",
        }
    }
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Skip => "skip",
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckOutcome {
    pub category: CheckCategory,
    pub status: CheckStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    /// Percentage, when the test tool reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckOutcome {
    fn new(category: CheckCategory, status: CheckStatus, duration: Duration) -> Self {
        Self {
            category,
            status,
            duration_ms: duration.as_millis() as u64,
            output: String::new(),
            error: None,
            error_kind: None,
            coverage: None,
            details: None,
        }
    }

    pub fn pass(category: CheckCategory, output: impl Into<String>, duration: Duration) -> Self {
        Self {
            output: output.into(),
            ..Self::new(category, CheckStatus::Pass, duration)
        }
    }

    pub fn fail(
        category: CheckCategory,
        error: impl Into<String>,
        kind: FailureKind,
        duration: Duration,
    ) -> Self {
        Self {
            error: Some(error.into()),
            error_kind: Some(kind),
            ..Self::new(category, CheckStatus::Fail, duration)
        }
    }

    /// A skip; the reason is recorded as output.
    pub fn skip(category: CheckCategory, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            output: reason.into(),
            error_kind: Some(FailureKind::ToolchainMissing),
            ..Self::new(category, CheckStatus::Skip, duration)
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_coverage(mut self, coverage: f64) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    Failure,
    Skipped,
}

impl OverallStatus {
    /// fail > pass > skipped.
    pub fn from_counts(passed: usize, failed: usize) -> Self {
        if failed > 0 {
            OverallStatus::Failure
        } else if passed > 0 {
            OverallStatus::Success
        } else {
            OverallStatus::Skipped
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Success => "success",
            OverallStatus::Failure => "failure",
            OverallStatus::Skipped => "skipped",
        }
    }
}

/// Aggregate of one validation. Never mutated after it is returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub name: String,
    pub app_path: PathBuf,
    pub ecosystem: Ecosystem,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    /// Mean of the non-zero coverage values reported by checks; 0 when none.
    pub coverage: f64,
    pub results: Vec<CheckOutcome>,
    pub summary: String,
    pub overall_status: OverallStatus,
}

impl ValidationReport {
    /// Tally `results` and render the summary.
    pub fn from_outcomes(
        name: impl Into<String>,
        app_path: impl Into<PathBuf>,
        ecosystem: Ecosystem,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<CheckOutcome>,
    ) -> Self {
        let count = |status: CheckStatus| results.iter().filter(|r| r.status == status).count();
        let passed = count(CheckStatus::Pass);
        let failed = count(CheckStatus::Fail);
        let skipped = count(CheckStatus::Skip);

        let mut report = Self {
            name: name.into(),
            app_path: app_path.into(),
            ecosystem,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            total_tests: results.len(),
            passed_tests: passed,
            failed_tests: failed,
            skipped_tests: skipped,
            coverage: mean_coverage(&results),
            overall_status: OverallStatus::from_counts(passed, failed),
            results,
            summary: String::new(),
        };
        report.summary = report.render_summary();
        report
    }

    pub fn outcome(&self, category: CheckCategory) -> Option<&CheckOutcome> {
        self.results.iter().find(|r| r.category == category)
    }

    /// Multi-line human summary; a pure function of the report's data.
    pub fn render_summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "Validation: {} ({})", self.name, self.ecosystem);
        let _ = writeln!(
            s,
            "Total: {}, Passed: {}, Failed: {}, Skipped: {}",
            self.total_tests, self.passed_tests, self.failed_tests, self.skipped_tests
        );
        let _ = writeln!(s, "Duration: {}ms", self.duration_ms);
        if self.coverage > 0.0 {
            let _ = writeln!(s, "Coverage: {:.2}%", self.coverage);
        }
        for r in &self.results {
            let _ = writeln!(
                s,
                "- {} ({}): {}",
                r.category.title(),
                r.category,
                r.status.as_str().to_uppercase()
            );
            if let Some(err) = &r.error {
                let _ = writeln!(s, "  Error: {err}");
            }
        }
        let _ = write!(s, "Overall: {}", self.overall_status.as_str().to_uppercase());
        s
    }

    /// Write the report as pretty JSON.
    pub fn save_json(&self, path: &Path) -> Result<(), ValidationError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ValidationError::ReportWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn mean_coverage(results: &[CheckOutcome]) -> f64 {
    let values: Vec<f64> = results
        .iter()
        .filter_map(|r| r.coverage)
        .filter(|c| *c > 0.0)
        .collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
