//! Execution of a single pipeline step.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gantry_core::{
    detect, process, reserve_port, scan_tree, verify_manifest, CommandKind, CommandResolver,
    Ecosystem, FailureKind, GantryConfig, Invocation, ProcessError, Resolution, ServerProcess,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::step::{StepKind, StepSpec};

/// Result of one step. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutcome {
    pub name: String,

    /// Skipped steps count as successful.
    pub success: bool,

    #[serde(default)]
    pub skipped: bool,

    /// Combined stdout/stderr, or the skip reason.
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,

    pub duration_ms: u64,
}

impl StepOutcome {
    pub fn passed(name: &str, output: String, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            skipped: false,
            output,
            error: None,
            error_kind: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn skipped(name: &str, reason: String, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            skipped: true,
            output: reason,
            error: None,
            error_kind: Some(FailureKind::ToolchainMissing),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn failed(
        name: &str,
        output: String,
        error: String,
        kind: FailureKind,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            skipped: false,
            output,
            error: Some(error),
            error_kind: Some(kind),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Mutable state threaded through the steps of one run.
#[derive(Debug)]
pub struct RunState {
    /// Root of the ephemeral workspace.
    pub workspace: PathBuf,
    /// `workspace/repo`; every step but fetch runs here.
    pub repo_dir: PathBuf,
    pub ecosystem: Option<Ecosystem>,
    pub fetched: bool,
}

impl RunState {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            repo_dir: workspace.join("repo"),
            ecosystem: None,
            fetched: false,
        }
    }

    /// Ecosystem recorded by an analyze step, or detected now and remembered.
    fn ecosystem(&mut self) -> Ecosystem {
        *self
            .ecosystem
            .get_or_insert_with(|| detect(&self.repo_dir, None))
    }
}

/// Runs steps against a workspace using the resolver and the process manager.
#[derive(Debug, Clone)]
pub struct StepRunner {
    resolver: Arc<CommandResolver>,
    config: GantryConfig,
    /// Held from bind to stop when `api_test_port` is fixed.
    port_lock: Arc<Mutex<()>>,
}

impl StepRunner {
    pub fn new(resolver: Arc<CommandResolver>, config: GantryConfig) -> Self {
        Self {
            resolver,
            config,
            port_lock: Arc::new(Mutex::new(())),
        }
    }

    fn timeout_for(&self, step: &StepSpec) -> Duration {
        step.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.step_timeout())
    }

    fn work_dir_for(&self, step: &StepSpec, state: &RunState) -> PathBuf {
        match &step.work_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => state.repo_dir.join(dir),
            None => state.repo_dir.clone(),
        }
    }

    /// Execute `step`. Never fails: every condition becomes a [`StepOutcome`].
    pub async fn run_step(
        &self,
        step: &StepSpec,
        ctx: &RunContext,
        state: &mut RunState,
    ) -> StepOutcome {
        let start = Instant::now();
        let timeout = self.timeout_for(step);
        debug!(step = %step.name, kind = step.kind.label(), timeout_secs = timeout.as_secs(), "executing step");

        match &step.kind {
            StepKind::Fetch => self.fetch(step, ctx, state, timeout, start).await,
            StepKind::Analyze => {
                let eco = detect(&self.work_dir_for(step, state), None);
                state.ecosystem = Some(eco);
                StepOutcome::passed(&step.name, format!("detected ecosystem: {eco}"), start.elapsed())
            }
            StepKind::SecurityScan => {
                let eco = state.ecosystem();
                let findings = scan_tree(&self.work_dir_for(step, state), eco);
                if findings.is_empty() {
                    StepOutcome::passed(&step.name, "no findings".to_string(), start.elapsed())
                } else {
                    let output = findings
                        .iter()
                        .map(|f| f.to_string())
                        .collect::<Vec<_>>()
                        .join("\n");
                    StepOutcome::failed(
                        &step.name,
                        output,
                        format!("{} security finding(s)", findings.len()),
                        FailureKind::ExecutionFailure,
                        start.elapsed(),
                    )
                }
            }
            StepKind::Command { program, args } => {
                let inv = Invocation::new(program.clone(), args.clone());
                let dir = self.work_dir_for(step, state);
                self.run_invocations(&step.name, &[inv], &dir, timeout, start).await
            }
            StepKind::Build | StepKind::StaticCheck | StepKind::UnitTest | StepKind::RunServer => {
                let Some(kind) = step.kind.command_kind() else {
                    return StepOutcome::skipped(&step.name, "nothing to run".to_string(), start.elapsed());
                };
                let eco = state.ecosystem();
                let dir = self.work_dir_for(step, state);

                if kind == CommandKind::Build {
                    if let Err(e) = verify_manifest(eco, &dir) {
                        return StepOutcome::failed(
                            &step.name,
                            String::new(),
                            e.to_string(),
                            FailureKind::ExecutionFailure,
                            start.elapsed(),
                        );
                    }
                }

                match self.resolver.resolve(eco, kind, &dir) {
                    Resolution::Skip { reason } => {
                        info!(step = %step.name, ecosystem = %eco, reason = %reason, "step skipped");
                        StepOutcome::skipped(&step.name, reason, start.elapsed())
                    }
                    Resolution::Run(invs) if kind == CommandKind::RunServer => {
                        self.smoke_server(&step.name, &invs, &dir, timeout, start).await
                    }
                    Resolution::Run(invs) => {
                        self.run_invocations(&step.name, &invs, &dir, timeout, start).await
                    }
                }
            }
        }
    }

    async fn fetch(
        &self,
        step: &StepSpec,
        ctx: &RunContext,
        state: &mut RunState,
        timeout: Duration,
        start: Instant,
    ) -> StepOutcome {
        if state.fetched {
            return StepOutcome::skipped(
                &step.name,
                "repository already fetched".to_string(),
                start.elapsed(),
            );
        }
        if ctx.clone_url.trim().is_empty() {
            return StepOutcome::failed(
                &step.name,
                String::new(),
                "run context has no clone URL".to_string(),
                FailureKind::ExecutionFailure,
                start.elapsed(),
            );
        }

        let mut args = vec!["clone".to_string()];
        if let Some(branch) = ctx.branch() {
            args.push("--branch".to_string());
            args.push(branch.to_string());
        }
        args.push(ctx.clone_url.clone());
        args.push(state.repo_dir.to_string_lossy().into_owned());

        let inv = Invocation::new("git", args);
        let workspace = state.workspace.clone();
        let outcome = self
            .run_invocations(&step.name, &[inv], &workspace, timeout, start)
            .await;
        // a failed clone still counts as the fetch attempt
        state.fetched = true;
        outcome
    }

    async fn run_invocations(
        &self,
        name: &str,
        invs: &[Invocation],
        dir: &Path,
        timeout: Duration,
        start: Instant,
    ) -> StepOutcome {
        match process::run_sequence(invs, dir, timeout).await {
            Ok(seq) if seq.success => StepOutcome::passed(name, seq.output, start.elapsed()),
            Ok(seq) => {
                let error = format!(
                    "`{}` failed: {}",
                    seq.failed_command.unwrap_or_default(),
                    seq.failure_reason.unwrap_or_default()
                );
                StepOutcome::failed(
                    name,
                    seq.output,
                    error,
                    FailureKind::ExecutionFailure,
                    start.elapsed(),
                )
            }
            Err(e) => process_error_outcome(name, e, start),
        }
    }

    /// Build whatever the server needs, start it, and check it is still up
    /// after the grace period.
    async fn smoke_server(
        &self,
        name: &str,
        invs: &[Invocation],
        dir: &Path,
        timeout: Duration,
        start: Instant,
    ) -> StepOutcome {
        let Some((server_inv, prepare)) = invs.split_last() else {
            return StepOutcome::skipped(name, "no server command".to_string(), start.elapsed());
        };

        let mut output = String::new();
        if !prepare.is_empty() {
            match process::run_sequence(prepare, dir, timeout).await {
                Ok(seq) if seq.success => output.push_str(&seq.output),
                Ok(seq) => {
                    return StepOutcome::failed(
                        name,
                        seq.output,
                        format!("server preparation failed: {}", seq.failure_reason.unwrap_or_default()),
                        FailureKind::ExecutionFailure,
                        start.elapsed(),
                    )
                }
                Err(e) => return process_error_outcome(name, e, start),
            }
        }

        // concurrent runs on one engine would race for a fixed port
        let _port_guard = if self.config.api_test_port != 0 {
            Some(self.port_lock.lock().await)
        } else {
            None
        };

        let port = match reserve_port(self.config.api_test_port) {
            Ok(port) => port,
            Err(e) => {
                return StepOutcome::failed(
                    name,
                    output,
                    format!("no free port: {e}"),
                    FailureKind::EngineFault,
                    start.elapsed(),
                )
            }
        };
        let inv = server_inv
            .clone()
            .with_port(port)
            .with_env("PORT", port.to_string());

        let mut server = match ServerProcess::start(
            &inv,
            dir,
            self.config.server_grace(),
            self.config.stop_grace(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => return process_error_outcome(name, e, start),
        };

        let exited = server.has_exited();
        server.stop().await;
        output.push_str(&format!("$ {inv}\n"));
        output.push_str(&server.output());

        if exited {
            StepOutcome::failed(
                name,
                output,
                "server exited during startup".to_string(),
                FailureKind::ExecutionFailure,
                start.elapsed(),
            )
        } else {
            StepOutcome::passed(name, output, start.elapsed())
        }
    }
}

fn process_error_outcome(name: &str, err: ProcessError, start: Instant) -> StepOutcome {
    match err.kind() {
        FailureKind::ToolchainMissing => StepOutcome::skipped(name, err.to_string(), start.elapsed()),
        kind => StepOutcome::failed(
            name,
            err.partial_output().to_string(),
            err.to_string(),
            kind,
            start.elapsed(),
        ),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner() -> StepRunner {
        StepRunner::new(
            Arc::new(CommandResolver::builtin()),
            GantryConfig::builtin().with_step_timeout_secs(30),
        )
    }

    fn workspace() -> (tempfile::TempDir, RunState) {
        let ws = tempfile::tempdir().unwrap();
        let state = RunState::new(ws.path());
        std::fs::create_dir_all(&state.repo_dir).unwrap();
        (ws, state)
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = StepOutcome::passed("build", "ok".into(), Duration::from_millis(5));
        assert!(ok.success && !ok.skipped && ok.error.is_none());

        let skip = StepOutcome::skipped("test", "no tests".into(), Duration::ZERO);
        assert!(skip.success && skip.skipped);
        assert_eq!(skip.error_kind, Some(FailureKind::ToolchainMissing));

        let fail = StepOutcome::failed(
            "build",
            String::new(),
            "boom".into(),
            FailureKind::ExecutionFailure,
            Duration::ZERO,
        );
        assert!(!fail.success);
        assert_eq!(fail.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_command_step_runs_in_repo_dir() {
        let (_ws, mut state) = workspace();
        std::fs::write(state.repo_dir.join("hello.txt"), "hi there").unwrap();
        let step = StepSpec::command("cat", "cat", ["hello.txt"]);

        let outcome = runner()
            .run_step(&step, &RunContext::default(), &mut state)
            .await;
        assert!(outcome.success);
        assert!(outcome.output.contains("hi there"));
    }

    #[tokio::test]
    async fn test_failing_command_step() {
        let (_ws, mut state) = workspace();
        let step = StepSpec::command("fail", "sh", ["-c", "echo nope; exit 2"]);

        let outcome = runner()
            .run_step(&step, &RunContext::default(), &mut state)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(FailureKind::ExecutionFailure));
        assert!(outcome.error.unwrap().contains("exit status 2"));
    }

    #[tokio::test]
    async fn test_step_timeout_is_enforced() {
        let (_ws, mut state) = workspace();
        let step = StepSpec::command("hang", "sleep", ["30"]).with_timeout_secs(1);

        let outcome = runner()
            .run_step(&step, &RunContext::default(), &mut state)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(FailureKind::TimeoutExceeded));
    }

    #[tokio::test]
    async fn test_missing_program_is_skipped() {
        let (_ws, mut state) = workspace();
        let step = StepSpec::command("ghost", "gantry-no-such-tool", ["x"]);

        let outcome = runner()
            .run_step(&step, &RunContext::default(), &mut state)
            .await;
        assert!(outcome.success);
        assert!(outcome.skipped);
    }

    #[tokio::test]
    async fn test_build_skips_without_manifest() {
        let (_ws, mut state) = workspace();
        let outcome = runner()
            .run_step(
                &StepSpec::new("build", StepKind::Build),
                &RunContext::default(),
                &mut state,
            )
            .await;
        assert!(outcome.success);
        assert!(outcome.skipped);
    }

    #[tokio::test]
    async fn test_build_fails_on_malformed_manifest() {
        let (_ws, mut state) = workspace();
        std::fs::write(state.repo_dir.join("package.json"), "{ broken").unwrap();
        let outcome = runner()
            .run_step(
                &StepSpec::new("build", StepKind::Build),
                &RunContext::default(),
                &mut state,
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("package.json"));
    }

    #[tokio::test]
    async fn test_analyze_records_ecosystem() {
        let (_ws, mut state) = workspace();
        std::fs::write(state.repo_dir.join("requirements.txt"), "flask\n").unwrap();
        let outcome = runner()
            .run_step(
                &StepSpec::new("analyze", StepKind::Analyze),
                &RunContext::default(),
                &mut state,
            )
            .await;
        assert!(outcome.success);
        assert_eq!(state.ecosystem, Some(Ecosystem::Python));
    }

    #[tokio::test]
    async fn test_security_scan_fails_on_secret() {
        let (_ws, mut state) = workspace();
        std::fs::write(
            state.repo_dir.join("main.go"),
            "package main\n\nvar password = \"supersecret123\"\n",
        )
        .unwrap();
        let outcome = runner()
            .run_step(
                &StepSpec::new("scan", StepKind::SecurityScan),
                &RunContext::default(),
                &mut state,
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.output.contains("main.go:3"));
        assert!(!outcome.output.contains("supersecret123"));
    }

    #[tokio::test]
    async fn test_fetch_without_url_fails() {
        let (_ws, mut state) = workspace();
        let outcome = runner()
            .run_step(
                &StepSpec::new("fetch", StepKind::Fetch),
                &RunContext::default(),
                &mut state,
            )
            .await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_second_fetch_is_skipped() {
        let (_ws, mut state) = workspace();
        state.fetched = true;
        let outcome = runner()
            .run_step(
                &StepSpec::new("fetch", StepKind::Fetch),
                &RunContext::new("a/b", "/nowhere"),
                &mut state,
            )
            .await;
        assert!(outcome.skipped);
    }
}
