//! Runs the check battery against one application and assembles the report.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gantry_core::{
    detect, emit_check_finished, emit_validation_finished, validation_span, CommandResolver,
    FailureKind, FailurePolicy, GantryConfig,
};
use tokio::sync::Mutex;
use tracing::{info, warn, Instrument};

use crate::checks::{default_checks, Check, CheckContext};
use crate::report::{CheckOutcome, CheckStatus, ValidationReport};
use crate::target::AppTarget;

/// Validates application directories.
///
/// Checks run sequentially in report order. Several validations may run on
/// one tester concurrently; they share only the API port lock.
pub struct ApplicationTester {
    config: GantryConfig,
    resolver: Arc<CommandResolver>,
    checks: Vec<Box<dyn Check>>,
    policy: FailurePolicy,
}

impl std::fmt::Debug for ApplicationTester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationTester")
            .field("config", &self.config)
            .field("checks", &self.checks.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for ApplicationTester {
    fn default() -> Self {
        Self::new(GantryConfig::default())
    }
}

impl ApplicationTester {
    pub fn new(config: GantryConfig) -> Self {
        Self::with_resolver(config, CommandResolver::builtin())
    }

    pub fn with_resolver(config: GantryConfig, resolver: CommandResolver) -> Self {
        Self {
            config,
            resolver: Arc::new(resolver),
            checks: default_checks(Arc::new(Mutex::new(()))),
            policy: FailurePolicy::Continue,
        }
    }

    /// Under fail-fast, checks after the first failure are reported as skipped.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &GantryConfig {
        &self.config
    }

    /// Validate the application at `path`, optionally trusting `language`.
    pub async fn validate(&self, path: &Path, language: Option<&str>) -> ValidationReport {
        let mut target = AppTarget::new(path);
        if let Some(lang) = language {
            target = target.with_language(lang);
        }
        self.validate_target(&target).await
    }

    pub async fn validate_target(&self, target: &AppTarget) -> ValidationReport {
        let span = validation_span(&target.name);
        self.run_checks(target).instrument(span).await
    }

    async fn run_checks(&self, target: &AppTarget) -> ValidationReport {
        let started_at = Utc::now();
        let ecosystem = detect(&target.path, target.language.as_deref());
        info!(path = %target.path.display(), %ecosystem, "validation started");

        let ctx = CheckContext {
            target: target.clone(),
            ecosystem,
            resolver: self.resolver.clone(),
            config: self.config.clone(),
        };

        let mut results = Vec::with_capacity(self.checks.len());
        if !target.path.is_dir() {
            warn!(path = %target.path.display(), "application directory does not exist");
            let reason = format!("application directory {} does not exist", target.path.display());
            for check in &self.checks {
                results.push(CheckOutcome::fail(
                    check.category(),
                    reason.clone(),
                    FailureKind::EngineFault,
                    Duration::ZERO,
                ));
            }
        } else {
            let mut stopped = false;
            for check in &self.checks {
                let outcome = if stopped {
                    CheckOutcome::skip(
                        check.category(),
                        "not run: an earlier check failed",
                        Duration::ZERO,
                    )
                } else {
                    check.run(&ctx).await
                };
                emit_check_finished(
                    &target.name,
                    outcome.category.as_str(),
                    outcome.status.as_str(),
                    outcome.duration_ms,
                );
                stopped = stopped || self.policy.stops_after(outcome.status == CheckStatus::Fail);
                results.push(outcome);
            }
        }

        let report = ValidationReport::from_outcomes(
            &target.name,
            &target.path,
            ecosystem,
            started_at,
            Utc::now(),
            results,
        );
        emit_validation_finished(
            &report.name,
            report.overall_status.as_str(),
            report.passed_tests,
            report.failed_tests,
            report.skipped_tests,
        );
        report
    }
}
