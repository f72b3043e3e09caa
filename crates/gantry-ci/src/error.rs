//! Engine-level errors.

use std::path::PathBuf;

use gantry_core::FailureKind;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("failed to create workspace under {root}: {source}")]
    Workspace {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove workspace {path}: {source}")]
    WorkspaceCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read pipeline definitions from {path}: {source}")]
    DefinitionsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pipeline definitions from {path}: {source}")]
    DefinitionsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid pipeline definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::EngineFault
    }
}
