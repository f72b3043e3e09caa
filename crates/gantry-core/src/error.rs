//! Error taxonomy shared by the workflow engine and the application tester.

use serde::{Deserialize, Serialize};

/// Classification attached to every failed or skipped step/check.
///
/// Callers use the tag to tell "the code is slow/hung" apart from "the code
/// is wrong" without parsing error strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No resolver mapping, or the executable is not installed. Always a skip.
    ToolchainMissing,
    /// The process ran and exited non-zero, or probes were unreachable.
    ExecutionFailure,
    /// The process exceeded its bounded duration.
    TimeoutExceeded,
    /// Workspace setup/teardown failure or unknown pipeline. Aborts the run.
    EngineFault,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ToolchainMissing => "toolchain_missing",
            FailureKind::ExecutionFailure => "execution_failure",
            FailureKind::TimeoutExceeded => "timeout_exceeded",
            FailureKind::EngineFault => "engine_fault",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the process manager.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("executable not found: {program}")]
    NotFound { program: String },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {limit_ms}ms")]
    Timeout {
        program: String,
        limit_ms: u64,
        /// Output captured before the process was killed.
        output: String,
    },

    #[error("invocation has an empty program")]
    EmptyProgram,

    #[error("io error while supervising {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Map the error onto the engine-level taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessError::NotFound { .. } | ProcessError::EmptyProgram => {
                FailureKind::ToolchainMissing
            }
            ProcessError::Launch { .. } => FailureKind::ToolchainMissing,
            ProcessError::Timeout { .. } => FailureKind::TimeoutExceeded,
            ProcessError::Io { .. } => FailureKind::ExecutionFailure,
        }
    }

    /// Output captured before the failure, if any.
    pub fn partial_output(&self) -> &str {
        match self {
            ProcessError::Timeout { output, .. } => output,
            _ => "",
        }
    }
}

/// Errors produced while checking a build manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed {file}: {reason}")]
    Malformed { file: String, reason: String },

    #[error("failed to read {file}: {source}")]
    Unreadable {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced while loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
