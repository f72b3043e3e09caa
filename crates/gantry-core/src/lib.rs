//! Gantry Core Library
//!
//! Building blocks shared by the workflow engine and the application tester:
//! ecosystem detection, command resolution, bounded process execution and
//! source-tree scanning.

pub mod config;
pub mod ecosystem;
pub mod error;
pub mod manifest;
pub mod obs;
pub mod policy;
pub mod probe;
pub mod process;
pub mod resolver;
pub mod scan;
pub mod telemetry;

pub use config::GantryConfig;
pub use ecosystem::{detect, Ecosystem, DEFAULT_ECOSYSTEM};
pub use error::{ConfigError, FailureKind, ManifestError, ProcessError};
pub use manifest::verify_manifest;
pub use obs::{
    emit_check_finished, emit_run_finished, emit_run_started, emit_step_finished,
    emit_validation_finished, run_span, validation_span,
};
pub use policy::FailurePolicy;
pub use process::{reserve_port, run, run_sequence, ProcessOutput, SequenceOutput, ServerProcess};
pub use resolver::{CommandKind, CommandResolver, Invocation, Resolution, PORT_TOKEN};
pub use scan::{scan_tree, Finding, ScanRule};
pub use telemetry::{init_tracing, LogFormat};

/// Gantry version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
