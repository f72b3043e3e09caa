//! The workflow engine: pipeline registry, run counters and run execution.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::Utc;
use gantry_core::{
    emit_run_finished, emit_run_started, emit_step_finished, run_span, CommandResolver, FailureKind,
    GantryConfig,
};
use serde_json::json;
use tempfile::TempDir;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::context::RunContext;
use crate::definition::PipelineDefinition;
use crate::error::EngineError;
use crate::pipeline::{RunResult, META_DEFINITION_DIGEST, META_ECOSYSTEM};
use crate::runner::{RunState, StepRunner};

/// Active and cumulative run counts, guarded together.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobCounters {
    pub active: usize,
    pub total: usize,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds one slot of the active count; releases it on drop.
struct ActiveRun<'a> {
    counters: &'a RwLock<JobCounters>,
}

impl<'a> ActiveRun<'a> {
    fn begin(counters: &'a RwLock<JobCounters>) -> Self {
        let mut c = write(counters);
        c.active += 1;
        c.total += 1;
        drop(c);
        Self { counters }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut c = write(self.counters);
        c.active = c.active.saturating_sub(1);
    }
}

/// Tempdir prefix for `pipeline`; anything outside `[A-Za-z0-9_-]` becomes `_`
/// so a name never introduces path separators.
fn workspace_prefix(pipeline: &str) -> String {
    let safe: String = pipeline
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    format!("gantry_{safe}_")
}

/// Runs named pipelines, each in its own ephemeral workspace.
///
/// One engine is meant to be shared (e.g. behind an `Arc`) by every caller in
/// a process; runs on the same engine proceed concurrently and share only the
/// counters.
#[derive(Debug)]
pub struct WorkflowEngine {
    pipelines: RwLock<HashMap<String, PipelineDefinition>>,
    counters: RwLock<JobCounters>,
    runner: StepRunner,
    config: GantryConfig,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(GantryConfig::default())
    }
}

impl WorkflowEngine {
    /// Engine with the builtin resolver table and the `ci_cd` pipeline registered.
    pub fn new(config: GantryConfig) -> Self {
        Self::with_resolver(config, CommandResolver::builtin())
    }

    pub fn with_resolver(config: GantryConfig, resolver: CommandResolver) -> Self {
        let engine = Self {
            pipelines: RwLock::new(HashMap::new()),
            counters: RwLock::new(JobCounters::default()),
            runner: StepRunner::new(Arc::new(resolver), config.clone()),
            config,
        };
        engine.register(PipelineDefinition::ci_cd());
        engine
    }

    pub fn config(&self) -> &GantryConfig {
        &self.config
    }

    /// Insert or replace the definition registered under its name.
    pub fn register(&self, definition: PipelineDefinition) {
        info!(pipeline = %definition.name, steps = definition.steps.len(), "registering pipeline");
        write(&self.pipelines).insert(definition.name.clone(), definition);
    }

    /// Registered pipeline names, sorted.
    pub fn list_registered(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.pipelines).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn definition(&self, name: &str) -> Option<PipelineDefinition> {
        read(&self.pipelines).get(name).cloned()
    }

    pub fn active_count(&self) -> usize {
        read(&self.counters).active
    }

    pub fn total_count(&self) -> usize {
        read(&self.counters).total
    }

    pub fn counters(&self) -> JobCounters {
        *read(&self.counters)
    }

    fn create_workspace(&self, pipeline: &str) -> Result<TempDir, EngineError> {
        let root = self
            .config
            .workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&root)
            .and_then(|_| {
                tempfile::Builder::new()
                    .prefix(&workspace_prefix(pipeline))
                    .tempdir_in(&root)
            })
            .and_then(|ws| std::fs::create_dir(ws.path().join("repo")).map(|_| ws))
            .map_err(|source| EngineError::Workspace { root, source })
    }

    /// Run the pipeline registered as `name` against `ctx`.
    ///
    /// Always returns a well-formed result. Unknown pipelines and workspace
    /// failures abort before any step; otherwise steps run in order under the
    /// pipeline's failure policy. The workspace is deleted and the active
    /// count restored on every exit path.
    pub async fn execute(&self, name: &str, ctx: RunContext) -> RunResult {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();

        let Some(definition) = self.definition(name) else {
            let err = EngineError::PipelineNotFound(name.to_string());
            warn!(pipeline = %name, "{err}");
            return RunResult::aborted(run_id, name, ctx, err.to_string(), started_at);
        };

        let _active = ActiveRun::begin(&self.counters);
        let span = run_span(&run_id, name);
        self.run_definition(definition, run_id, ctx, started_at)
            .instrument(span)
            .await
    }

    async fn run_definition(
        &self,
        definition: PipelineDefinition,
        run_id: String,
        mut ctx: RunContext,
        started_at: chrono::DateTime<Utc>,
    ) -> RunResult {
        let name = definition.name.as_str();
        emit_run_started(&run_id, name, &ctx.repository);
        let start = Instant::now();

        let workspace = match self.create_workspace(name) {
            Ok(ws) => ws,
            Err(err) => {
                warn!(error = %err, "workspace creation failed");
                let result = RunResult::aborted(run_id, name, ctx, err.to_string(), started_at);
                emit_run_finished(&result.run_id, result.duration_ms, 0, false);
                return result;
            }
        };
        let workspace_path: PathBuf = workspace.path().to_path_buf();
        ctx.work_dir = Some(workspace_path.clone());

        let mut state = RunState::new(&workspace_path);
        let mut steps = Vec::with_capacity(definition.steps.len());
        let mut error = None;
        let mut error_kind = None;

        for step in &definition.steps {
            let outcome = self.runner.run_step(step, &ctx, &mut state).await;
            emit_step_finished(
                &run_id,
                &outcome.name,
                outcome.success,
                outcome.skipped,
                outcome.duration_ms,
            );
            let failed = !outcome.success;
            if failed && error.is_none() {
                error = Some(format!(
                    "step '{}' failed: {}",
                    outcome.name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                ));
                error_kind = outcome.error_kind;
            }
            steps.push(outcome);
            if definition.failure_policy.stops_after(failed) {
                break;
            }
        }

        let mut cleaned = true;
        if let Err(source) = workspace.close() {
            let err = EngineError::WorkspaceCleanup {
                path: workspace_path.clone(),
                source,
            };
            warn!(error = %err, "workspace cleanup failed");
            cleaned = false;
            error = Some(match error.take() {
                Some(first) => format!("{first}; {err}"),
                None => err.to_string(),
            });
            error_kind = error_kind.or(Some(FailureKind::EngineFault));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(META_DEFINITION_DIGEST.to_string(), json!(definition.digest()));
        if let Some(eco) = state.ecosystem {
            metadata.insert(META_ECOSYSTEM.to_string(), json!(eco));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = cleaned && steps.iter().all(|s| s.success);
        emit_run_finished(&run_id, duration_ms, steps.len(), success);

        RunResult {
            run_id,
            pipeline: name.to_string(),
            success,
            error,
            error_kind,
            steps,
            duration_ms,
            started_at,
            finished_at: Utc::now(),
            context: ctx,
            metadata,
        }
    }
}
