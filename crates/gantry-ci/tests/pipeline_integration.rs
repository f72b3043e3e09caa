//! Integration tests for the workflow engine against throwaway git repositories.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use gantry_ci::{
    FailurePolicy, PipelineDefinition, RunContext, StepKind, StepSpec, WorkflowEngine,
};
use gantry_core::{
    probe::find_executable, reserve_port, CommandKind, CommandResolver, Ecosystem, FailureKind,
    GantryConfig, Invocation, Resolution,
};

fn engine_in(root: &Path) -> WorkflowEngine {
    WorkflowEngine::new(
        GantryConfig::builtin()
            .with_step_timeout_secs(60)
            .with_workspace_root(root),
    )
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=gantry", "-c", "user.email=gantry@example.com"])
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git failed to start");
    assert!(status.success(), "git {args:?} failed");
}

/// Create a committed repository holding `files`; `None` when git is unavailable.
fn source_repo(files: &[(&str, &str)]) -> Option<tempfile::TempDir> {
    find_executable("git")?;
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-q"]);
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-q", "-m", "initial"]);
    Some(dir)
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

/// Test: an unregistered pipeline fails without leaving a workspace behind
#[tokio::test]
async fn test_unregistered_pipeline() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let result = engine
        .execute("does-not-exist", RunContext::new("acme/widgets", "unused"))
        .await;

    assert!(!result.success);
    assert!(!result.error.as_deref().unwrap_or("").is_empty());
    assert_eq!(result.error_kind, Some(FailureKind::EngineFault));
    assert!(result.steps.is_empty());
    assert!(is_empty_dir(root.path()), "no workspace should be created");
    assert_eq!(engine.active_count(), 0);
}

/// Test: fetch succeeds, build and test resolve to skip, run succeeds
#[tokio::test]
async fn test_fetch_build_test_on_repo_without_manifest() {
    let Some(repo) = source_repo(&[("README.md", "# widgets\n")]) else {
        return;
    };
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine.register(PipelineDefinition::new(
        "ci",
        vec![
            StepSpec::new("fetch", StepKind::Fetch),
            StepSpec::new("build", StepKind::Build),
            StepSpec::new("test", StepKind::UnitTest),
        ],
    ));

    let ctx = RunContext::new("acme/widgets", repo.path().to_string_lossy());
    let result = engine.execute("ci", ctx).await;

    assert!(result.success, "{}", result.render_text());
    assert_eq!(result.steps.len(), 3);
    assert!(result.steps.iter().all(|s| s.success));
    assert!(!result.steps[0].skipped);
    assert!(result.steps[1].skipped);
    assert!(result.steps[2].skipped);
    assert_eq!(result.metadata["ecosystem"], "go");
}

/// Test: later steps run inside the fetched working copy
#[tokio::test]
async fn test_steps_run_in_fetched_repo() {
    let Some(repo) = source_repo(&[("VERSION", "1.4.2\n")]) else {
        return;
    };
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine.register(PipelineDefinition::new(
        "version",
        vec![
            StepSpec::new("fetch", StepKind::Fetch),
            StepSpec::command("read", "cat", ["VERSION"]),
        ],
    ));

    let result = engine
        .execute("version", RunContext::new("acme/widgets", repo.path().to_string_lossy()))
        .await;

    assert!(result.success, "{}", result.render_text());
    assert!(result.steps[1].output.contains("1.4.2"));
}

/// Test: analyze records the ecosystem in the run metadata
#[tokio::test]
async fn test_analyze_records_ecosystem_metadata() {
    let Some(repo) = source_repo(&[("package.json", r#"{"name": "widgets"}"#)]) else {
        return;
    };
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine.register(PipelineDefinition::new(
        "analyze",
        vec![
            StepSpec::new("fetch", StepKind::Fetch),
            StepSpec::new("analyze", StepKind::Analyze),
        ],
    ));

    let result = engine
        .execute("analyze", RunContext::new("acme/widgets", repo.path().to_string_lossy()))
        .await;

    assert!(result.success);
    assert_eq!(result.metadata["ecosystem"], "node");
    assert_eq!(
        result.metadata["definition_digest"],
        engine.definition("analyze").unwrap().digest()
    );
}

/// Test: a failing step stops the run; executed steps are a prefix
#[tokio::test]
async fn test_fail_fast_stops_at_first_failure() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let definition = PipelineDefinition::new(
        "three",
        vec![
            StepSpec::command("first", "sh", ["-c", "echo first"]),
            StepSpec::command("second", "sh", ["-c", "echo broken; exit 1"]),
            StepSpec::command("third", "sh", ["-c", "echo third"]),
        ],
    );
    engine.register(definition.clone());

    let result = engine.execute("three", RunContext::default()).await;

    assert!(!result.success);
    assert_eq!(result.steps.len(), 2);
    for (outcome, spec) in result.steps.iter().zip(&definition.steps) {
        assert_eq!(outcome.name, spec.name);
    }
    assert!(!result.steps.last().unwrap().success);
    assert!(result.error.unwrap().contains("step 'second' failed"));
    assert_eq!(result.error_kind, Some(FailureKind::ExecutionFailure));
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.total_count(), 1);
}

/// Test: the continue policy attempts every step
#[tokio::test]
async fn test_continue_policy_runs_all_steps() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine.register(
        PipelineDefinition::new(
            "soft",
            vec![
                StepSpec::command("bad", "false", Vec::<String>::new()),
                StepSpec::command("good", "true", Vec::<String>::new()),
            ],
        )
        .with_policy(FailurePolicy::Continue),
    );

    let result = engine.execute("soft", RunContext::default()).await;

    assert!(!result.success);
    assert_eq!(result.steps.len(), 2);
    assert!(result.steps[1].success);
    assert!(result.error.unwrap().contains("'bad'"));
}

/// Test: the workspace is gone after the run, success or failure
#[tokio::test]
async fn test_workspace_removed_after_run() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine.register(PipelineDefinition::new(
        "touch",
        vec![
            StepSpec::command("write", "sh", ["-c", "echo data > artifact.txt"]),
            StepSpec::command("fail", "false", Vec::<String>::new()),
        ],
    ));

    let result = engine.execute("touch", RunContext::default()).await;

    let work_dir = result.context.work_dir.clone().expect("work_dir echoed");
    assert!(work_dir.starts_with(root.path()));
    assert!(!work_dir.exists());
    assert!(is_empty_dir(root.path()));
}

/// Test: a pipeline name with a path separator still runs in a workspace under the root
#[tokio::test]
async fn test_pipeline_name_with_separator() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine.register(PipelineDefinition::new(
        "team/ci",
        vec![StepSpec::command("ok", "true", Vec::<String>::new())],
    ));

    let result = engine.execute("team/ci", RunContext::default()).await;

    assert!(result.success, "{}", result.render_text());
    let work_dir = result.context.work_dir.clone().expect("work_dir echoed");
    assert_eq!(work_dir.parent(), Some(root.path()));
    assert!(is_empty_dir(root.path()));
}

/// Test: a workspace that cannot be removed fails the run as an engine fault
#[tokio::test]
async fn test_workspace_cleanup_failure_fails_run() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine.register(PipelineDefinition::new(
        "wipe",
        vec![StepSpec::command(
            "wipe",
            "sh",
            ["-c", "rm -rf \"$(dirname \"$(pwd)\")\""],
        )],
    ));

    let result = engine.execute("wipe", RunContext::default()).await;

    assert!(result.steps[0].success, "{}", result.render_text());
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(FailureKind::EngineFault));
    assert!(result.error.unwrap().contains("failed to remove workspace"));
    assert_eq!(engine.active_count(), 0);
}

/// Test: step timeouts surface as a distinct failure kind
#[tokio::test]
async fn test_step_timeout() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine.register(PipelineDefinition::new(
        "slow",
        vec![StepSpec::command("hang", "sleep", ["30"]).with_timeout_secs(1)],
    ));

    let result = engine.execute("slow", RunContext::default()).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(FailureKind::TimeoutExceeded));
    assert!(is_empty_dir(root.path()));
}

/// Test: concurrent runs get separate workspaces and counters settle
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine_in(root.path()));
    engine.register(PipelineDefinition::new(
        "nap",
        vec![StepSpec::command("nap", "sleep", ["0.3"])],
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("nap", RunContext::default()).await })
        })
        .collect();

    let mut dirs = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success, "{}", result.render_text());
        dirs.push(result.context.work_dir.unwrap());
    }
    dirs.sort();
    dirs.dedup();

    assert_eq!(dirs.len(), 4);
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.total_count(), 4);
    assert!(is_empty_dir(root.path()));
}

/// Test: definitions loaded from JSON can be registered and executed
#[tokio::test]
async fn test_register_from_json_file() {
    let root = tempfile::tempdir().unwrap();
    let defs_dir = tempfile::tempdir().unwrap();
    let path = defs_dir.path().join("pipelines.json");
    std::fs::write(
        &path,
        r#"[{"name": "hello", "steps": [
            {"name": "greet", "kind": {"command": {"program": "echo", "args": ["hello"]}}}
        ]}]"#,
    )
    .unwrap();

    let engine = engine_in(root.path());
    for def in PipelineDefinition::load_json(&path).unwrap() {
        engine.register(def);
    }
    assert_eq!(engine.list_registered(), vec!["ci_cd", "hello"]);

    let result = engine.execute("hello", RunContext::default()).await;
    assert!(result.success);
    assert!(result.steps[0].output.contains("hello"));
}

/// Test: runs sharing a fixed server port take turns instead of racing for it
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fixed_port_server_steps_serialize() {
    if find_executable("python3").is_none() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let port = reserve_port(0).unwrap();
    let mut resolver = CommandResolver::builtin();
    resolver.register(Ecosystem::Go, CommandKind::RunServer, |_| {
        Resolution::run(Invocation::new(
            "python3",
            [
                "-c",
                "import os,socket,time\n\
                 s=socket.socket()\n\
                 s.bind(('127.0.0.1', int(os.environ['PORT'])))\n\
                 s.listen()\n\
                 time.sleep(60)",
            ],
        ))
    });
    let engine = Arc::new(WorkflowEngine::with_resolver(
        GantryConfig::builtin()
            .with_step_timeout_secs(60)
            .with_workspace_root(root.path())
            .with_api_test_port(port)
            .with_server_grace_ms(500),
        resolver,
    ));
    engine.register(PipelineDefinition::new(
        "serve",
        vec![StepSpec::new("serve", StepKind::RunServer)],
    ));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("serve", RunContext::default()).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success, "{}", result.render_text());
    }
    assert_eq!(engine.active_count(), 0);
}
