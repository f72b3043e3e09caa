//! Pipeline step definitions.

use std::path::PathBuf;

pub use gantry_core::FailurePolicy;
use gantry_core::CommandKind;
use serde::{Deserialize, Serialize};

/// What a step does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// git clone of the run's repository into `repo/`
    Fetch,

    /// Ecosystem detection, recorded in the run metadata
    Analyze,

    Build,

    StaticCheck,

    UnitTest,

    /// In-process security pattern scan
    SecurityScan,

    /// Start the application, check it survives the grace period, stop it
    RunServer,

    /// A literal invocation
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl StepKind {
    /// The resolver action behind this step, for toolchain-backed kinds.
    pub fn command_kind(&self) -> Option<CommandKind> {
        match self {
            StepKind::Build => Some(CommandKind::Build),
            StepKind::StaticCheck => Some(CommandKind::StaticCheck),
            StepKind::UnitTest => Some(CommandKind::UnitTest),
            StepKind::RunServer => Some(CommandKind::RunServer),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Fetch => "fetch",
            StepKind::Analyze => "analyze",
            StepKind::Build => "build",
            StepKind::StaticCheck => "static_check",
            StepKind::UnitTest => "unit_test",
            StepKind::SecurityScan => "security_scan",
            StepKind::RunServer => "run_server",
            StepKind::Command { .. } => "command",
        }
    }
}

/// One named step of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSpec {
    pub name: String,

    pub kind: StepKind,

    /// Falls back to the engine's configured step timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Relative paths are resolved against the run's `repo/` directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            timeout_secs: None,
            work_dir: None,
        }
    }

    /// A step running a literal command.
    pub fn command<I, S>(name: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            StepKind::Command {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}
