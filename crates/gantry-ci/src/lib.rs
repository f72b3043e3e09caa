//! Gantry CI - named pipelines of toolchain steps
//!
//! Provides a workflow engine that:
//! - Keeps a registry of named pipeline definitions
//! - Runs each invocation in a fresh ephemeral workspace
//! - Resolves build/lint/test steps per detected ecosystem
//! - Tracks active and total runs for status reporting

pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod step;

// Re-export key types
pub use context::{Commit, PushEvent, RunContext};
pub use definition::{PipelineDefinition, DEFAULT_PIPELINE};
pub use engine::{JobCounters, WorkflowEngine};
pub use error::EngineError;
pub use pipeline::RunResult;
pub use runner::{StepOutcome, StepRunner};
pub use step::{FailurePolicy, StepKind, StepSpec};
