//! Run context: which repository a pipeline run operates on.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A commit carried by the triggering event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
}

/// Repository identity and the ephemeral workspace of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunContext {
    /// `owner/name`.
    pub repository: String,
    pub clone_url: String,
    /// Git ref, e.g. `refs/heads/main`.
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
    /// Workspace assigned by the engine; set for the duration of the run and
    /// echoed in the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl RunContext {
    pub fn new(repository: impl Into<String>, clone_url: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            clone_url: clone_url.into(),
            ..Self::default()
        }
    }

    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = git_ref.into();
        self
    }

    pub fn with_commit(mut self, commit: Commit) -> Self {
        self.commits.push(commit);
        self
    }

    /// Branch name when the ref points at a branch head.
    ///
    /// A ref without a `refs/` prefix is taken as a bare branch name.
    pub fn branch(&self) -> Option<&str> {
        let git_ref = self.git_ref.trim();
        let branch = match git_ref.strip_prefix("refs/heads/") {
            Some(branch) => branch,
            None if git_ref.starts_with("refs/") => return None,
            None => git_ref,
        };
        Some(branch).filter(|b| !b.is_empty())
    }
}

/// The subset of a GitHub push-event payload the engine consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repository: PushRepository,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    pub full_name: String,
    pub clone_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushCommit {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: PushAuthor,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushAuthor {
    #[serde(default)]
    pub name: String,
}

impl PushEvent {
    /// Only pushes to `main` or `master` trigger a pipeline.
    pub fn targets_default_branch(&self) -> bool {
        self.git_ref.ends_with("/main") || self.git_ref.ends_with("/master")
    }
}

impl From<PushEvent> for RunContext {
    fn from(event: PushEvent) -> Self {
        RunContext {
            repository: event.repository.full_name,
            clone_url: event.repository.clone_url,
            git_ref: event.git_ref,
            commits: event
                .commits
                .into_iter()
                .map(|c| Commit {
                    id: c.id,
                    message: c.message,
                    author: c.author.name,
                })
                .collect(),
            work_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUSH: &str = r#"{
        "ref": "refs/heads/main",
        "repository": {
            "full_name": "acme/widgets",
            "clone_url": "https://github.com/acme/widgets.git"
        },
        "commits": [
            {"id": "abc123", "message": "fix build", "author": {"name": "Sam"}}
        ]
    }"#;

    #[test]
    fn test_push_event_to_context() {
        let event: PushEvent = serde_json::from_str(PUSH).unwrap();
        assert!(event.targets_default_branch());

        let ctx = RunContext::from(event);
        assert_eq!(ctx.repository, "acme/widgets");
        assert_eq!(ctx.branch(), Some("main"));
        assert_eq!(ctx.commits.len(), 1);
        assert_eq!(ctx.commits[0].author, "Sam");
        assert!(ctx.work_dir.is_none());
    }

    #[test]
    fn test_feature_branch_is_not_default() {
        let mut event: PushEvent = serde_json::from_str(PUSH).unwrap();
        event.git_ref = "refs/heads/feature/login".to_string();
        assert!(!event.targets_default_branch());
        event.git_ref = "refs/heads/master".to_string();
        assert!(event.targets_default_branch());
    }

    #[test]
    fn test_branch_only_for_heads() {
        let ctx = RunContext::new("a/b", "url").with_ref("refs/tags/v1.0");
        assert_eq!(ctx.branch(), None);
        let ctx = RunContext::new("a/b", "url");
        assert_eq!(ctx.branch(), None);
    }

    #[test]
    fn test_bare_branch_name() {
        let ctx = RunContext::new("a/b", "url").with_ref("dev");
        assert_eq!(ctx.branch(), Some("dev"));
        let ctx = RunContext::new("a/b", "url").with_ref("feature/login");
        assert_eq!(ctx.branch(), Some("feature/login"));
        let ctx = RunContext::new("a/b", "url").with_ref("refs/heads/");
        assert_eq!(ctx.branch(), None);
    }

    #[test]
    fn test_context_serializes_ref_field() {
        let ctx = RunContext::new("a/b", "url").with_ref("refs/heads/dev");
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["ref"], "refs/heads/dev");
        assert!(json.get("work_dir").is_none());
    }
}
