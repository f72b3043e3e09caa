//! Gantry - pipeline runner and application validator
//!
//! ## Commands
//!
//! - `run`: Execute a registered pipeline against a repository
//! - `validate`: Run the validation checks against an application directory
//! - `detect`: Print the ecosystem of a directory
//! - `pipelines`: List registered pipelines

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use gantry_apptest::{AppTarget, ApplicationTester, Endpoint, OverallStatus};
use gantry_ci::{PipelineDefinition, PushEvent, RunContext, WorkflowEngine, DEFAULT_PIPELINE};
use gantry_core::{detect, FailurePolicy, GantryConfig, LogFormat};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author = "Gantry Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pipeline runner and multi-language application validator", long_about = None)]
struct Cli {
    /// Configuration file (JSON); GANTRY_* variables override it
    #[arg(short, long, global = true, env = "GANTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline in a fresh workspace
    Run {
        /// Pipeline name
        #[arg(default_value = DEFAULT_PIPELINE)]
        pipeline: String,

        /// Repository full name (owner/name)
        #[arg(long, required_unless_present = "event")]
        repo: Option<String>,

        /// URL to clone from
        #[arg(long, required_unless_present = "event")]
        clone_url: Option<String>,

        /// Git ref to check out (refs/heads/<branch> or a bare branch name)
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Push event payload (JSON); pushes to other than main/master are ignored
        #[arg(long, conflicts_with_all = ["repo", "clone_url"])]
        event: Option<PathBuf>,

        /// Additional pipeline definitions (JSON)
        #[arg(long)]
        pipelines: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate an application directory
    Validate {
        /// Application directory
        path: PathBuf,

        /// Report name (default: directory name)
        #[arg(long)]
        name: Option<String>,

        /// Declared language; skips marker detection
        #[arg(short, long)]
        language: Option<String>,

        /// Application type (api, web, cli, ...)
        #[arg(long)]
        app_type: Option<String>,

        /// Endpoint to probe, e.g. "GET /users/{id}" (repeatable)
        #[arg(long = "endpoint")]
        endpoints: Vec<String>,

        /// Requirements document (JSON) describing the application
        #[arg(long)]
        requirements: Option<PathBuf>,

        /// Write the report as JSON to this file
        #[arg(long)]
        save: Option<PathBuf>,

        /// Stop at the first failing check
        #[arg(long)]
        fail_fast: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the detected ecosystem of a directory
    Detect {
        #[arg(default_value = ".")]
        path: PathBuf,

        #[arg(short, long)]
        language: Option<String>,
    },

    /// List registered pipelines
    Pipelines {
        /// Additional pipeline definitions (JSON)
        #[arg(long)]
        pipelines: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    gantry_core::init_tracing(LogFormat::from_json_flag(cli.json), level);

    let config = GantryConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            pipeline,
            repo,
            clone_url,
            git_ref,
            event,
            pipelines,
            format,
        } => {
            let ctx = match event {
                Some(path) => match context_from_event(&path)? {
                    Some(ctx) => ctx,
                    None => {
                        println!("Push does not target the default branch; nothing to run");
                        return Ok(());
                    }
                },
                None => {
                    let mut ctx = RunContext::new(
                        repo.unwrap_or_default(),
                        clone_url.unwrap_or_default(),
                    );
                    if let Some(r) = git_ref {
                        ctx = ctx.with_ref(r);
                    }
                    ctx
                }
            };
            cmd_run(config, &pipeline, ctx, pipelines.as_deref(), format).await
        }
        Commands::Validate {
            path,
            name,
            language,
            app_type,
            endpoints,
            requirements,
            save,
            fail_fast,
            format,
        } => {
            let target = build_target(
                &path,
                name,
                language,
                app_type,
                &endpoints,
                requirements.as_deref(),
            )?;
            let policy = if fail_fast {
                FailurePolicy::FailFast
            } else {
                FailurePolicy::Continue
            };
            cmd_validate(config, &target, policy, save.as_deref(), format).await
        }
        Commands::Detect { path, language } => cmd_detect(&path, language.as_deref()),
        Commands::Pipelines { pipelines } => cmd_pipelines(config, pipelines.as_deref()),
    }
}

/// Build an engine and register any extra definitions.
fn engine_with(config: GantryConfig, pipelines: Option<&Path>) -> Result<WorkflowEngine> {
    let engine = WorkflowEngine::new(config);
    if let Some(path) = pipelines {
        let defs = PipelineDefinition::load_json(path)
            .with_context(|| format!("Failed to load pipelines from {:?}", path))?;
        for def in defs {
            engine.register(def);
        }
    }
    Ok(engine)
}

/// `None` when the push targets a non-default branch.
fn context_from_event(path: &Path) -> Result<Option<RunContext>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read push event {:?}", path))?;
    let event: PushEvent = serde_json::from_str(&raw).context("Invalid push event payload")?;
    if !event.targets_default_branch() {
        info!(git_ref = %event.git_ref, "ignoring push to non-default branch");
        return Ok(None);
    }
    Ok(Some(RunContext::from(event)))
}

async fn cmd_run(
    config: GantryConfig,
    pipeline: &str,
    ctx: RunContext,
    pipelines: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let engine = engine_with(config, pipelines)?;
    let result = engine.execute(pipeline, ctx).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            println!("Run ID: {}", result.run_id);
            println!("{}", result.render_text());
        }
    }

    if result.success {
        Ok(())
    } else {
        anyhow::bail!(
            "Pipeline '{}' failed: {}",
            result.pipeline,
            result.error.as_deref().unwrap_or("unknown error")
        )
    }
}

fn build_target(
    path: &Path,
    name: Option<String>,
    language: Option<String>,
    app_type: Option<String>,
    endpoints: &[String],
    requirements: Option<&Path>,
) -> Result<AppTarget> {
    let mut target = match requirements {
        Some(file) => AppTarget::from_requirements_file(file, path)?,
        None => AppTarget::new(path),
    };
    if let Some(name) = name {
        target = target.with_name(name);
    }
    if let Some(language) = language {
        target = target.with_language(language);
    }
    if let Some(app_type) = app_type {
        target = target.with_app_type(app_type);
    }
    for spec in endpoints {
        let endpoint = Endpoint::parse(spec)
            .with_context(|| format!("Invalid endpoint {:?}, expected \"METHOD /path\"", spec))?;
        target = target.with_endpoint(endpoint);
    }
    Ok(target)
}

async fn cmd_validate(
    config: GantryConfig,
    target: &AppTarget,
    policy: FailurePolicy,
    save: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let tester = ApplicationTester::new(config).with_policy(policy);
    let report = tester.validate_target(target).await;

    if let Some(path) = save {
        report.save_json(path)?;
        info!(path = %path.display(), "report saved");
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => println!("{}", report.summary),
    }

    if report.overall_status == OverallStatus::Failure {
        anyhow::bail!("Validation of '{}' failed", report.name)
    }
    Ok(())
}

fn cmd_detect(path: &Path, language: Option<&str>) -> Result<()> {
    if language.is_none() && !path.is_dir() {
        anyhow::bail!("Not a directory: {:?}", path);
    }
    println!("{}", detect(path, language));
    Ok(())
}

fn cmd_pipelines(config: GantryConfig, pipelines: Option<&Path>) -> Result<()> {
    let engine = engine_with(config, pipelines)?;
    for name in engine.list_registered() {
        if let Some(def) = engine.definition(&name) {
            println!("{:<20} {}", name, def.step_names().join(" -> "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_defaults() {
        let cli = Cli::try_parse_from([
            "gantry",
            "run",
            "--repo",
            "acme/widgets",
            "--clone-url",
            "https://example.com/acme/widgets.git",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                pipeline, format, ..
            } => {
                assert_eq!(pipeline, "ci_cd");
                assert_eq!(format, OutputFormat::Text);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_run_requires_repo_or_event() {
        assert!(Cli::try_parse_from(["gantry", "run"]).is_err());
        assert!(Cli::try_parse_from(["gantry", "run", "--event", "push.json"]).is_ok());
    }

    #[test]
    fn test_build_target_from_flags() {
        let dir = tempfile::tempdir().unwrap();
        let target = build_target(
            dir.path(),
            Some("shop".into()),
            Some("go".into()),
            Some("web".into()),
            &["GET /items/{id}".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(target.name, "shop");
        assert_eq!(target.language.as_deref(), Some("go"));
        assert_eq!(target.app_type, "web");
        assert_eq!(target.endpoints[0].concrete_path(), "/items/1");

        assert!(build_target(dir.path(), None, None, None, &["items".to_string()], None).is_err());
    }

    #[test]
    fn test_context_from_event_ignores_feature_branches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("push.json");
        let payload = |git_ref: &str| {
            serde_json::json!({
                "ref": git_ref,
                "repository": {
                    "full_name": "acme/widgets",
                    "clone_url": "https://example.com/acme/widgets.git"
                },
                "commits": []
            })
            .to_string()
        };

        std::fs::write(&path, payload("refs/heads/feature/x")).unwrap();
        assert!(context_from_event(&path).unwrap().is_none());

        std::fs::write(&path, payload("refs/heads/main")).unwrap();
        let ctx = context_from_event(&path).unwrap().unwrap();
        assert_eq!(ctx.repository, "acme/widgets");
        assert_eq!(ctx.branch(), Some("main"));
    }

    #[test]
    fn test_engine_with_extra_pipelines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defs.json");
        std::fs::write(
            &path,
            r#"{"name": "lint", "steps": [{"name": "vet", "kind": "static_check"}]}"#,
        )
        .unwrap();
        let engine = engine_with(GantryConfig::builtin(), Some(&path)).unwrap();
        assert_eq!(engine.list_registered(), vec!["ci_cd", "lint"]);
    }
}
