//! Named pipeline definitions and their identity.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::step::{FailurePolicy, StepKind, StepSpec};

/// Name of the pipeline every engine registers at construction.
pub const DEFAULT_PIPELINE: &str = "ci_cd";

/// An ordered list of steps registered under a unique name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineDefinition {
    pub name: String,
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: name.into(),
            steps,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// clone, analyze, build, test, security scan.
    pub fn ci_cd() -> Self {
        Self::new(
            DEFAULT_PIPELINE,
            vec![
                StepSpec::new("clone", StepKind::Fetch).with_timeout_secs(5 * 60),
                StepSpec::new("analyze", StepKind::Analyze).with_timeout_secs(60),
                StepSpec::new("build", StepKind::Build).with_timeout_secs(10 * 60),
                StepSpec::new("test", StepKind::UnitTest).with_timeout_secs(15 * 60),
                StepSpec::new("security_scan", StepKind::SecurityScan).with_timeout_secs(5 * 60),
            ],
        )
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Deterministic digest of the ordered step names.
    pub fn digest(&self) -> String {
        compute_steps_digest(&self.step_names())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("pipeline name is empty"));
        }
        if self.steps.iter().any(|s| s.name.trim().is_empty()) {
            return Err(invalid("step name is empty"));
        }
        let empty_command = self.steps.iter().any(
            |s| matches!(&s.kind, StepKind::Command { program, .. } if program.trim().is_empty()),
        );
        if empty_command {
            return Err(invalid("command step has an empty program"));
        }
        Ok(())
    }

    /// Load definitions from a JSON file holding an array of definitions
    /// (a single definition object is accepted too).
    pub fn load_json(path: &Path) -> Result<Vec<Self>, EngineError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<PipelineDefinition>),
            One(PipelineDefinition),
        }

        let content = std::fs::read_to_string(path).map_err(|source| EngineError::DefinitionsRead {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: OneOrMany =
            serde_json::from_str(&content).map_err(|source| EngineError::DefinitionsParse {
                path: path.to_path_buf(),
                source,
            })?;
        let defs = match parsed {
            OneOrMany::Many(defs) => defs,
            OneOrMany::One(def) => vec![def],
        };
        for def in &defs {
            def.validate()?;
        }
        Ok(defs)
    }
}

fn compute_steps_digest(steps: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
