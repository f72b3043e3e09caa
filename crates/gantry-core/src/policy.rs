//! What a sequence of steps or checks does after a failure.

use serde::{Deserialize, Serialize};

/// Pipelines default to [`FailurePolicy::FailFast`]; the validation check
/// suite runs with [`FailurePolicy::Continue`] to get a complete picture.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure; later items are not attempted.
    #[default]
    FailFast,
    /// Run every item and report all failures.
    Continue,
}

impl FailurePolicy {
    pub fn stops_after(&self, failed: bool) -> bool {
        failed && *self == FailurePolicy::FailFast
    }
}
