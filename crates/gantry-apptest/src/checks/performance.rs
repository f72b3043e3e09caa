use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use gantry_core::probe::{files_with_extensions, walk_files};
use gantry_core::resolver::GO_SERVER_BINARY;
use gantry_core::Ecosystem;
use serde::Serialize;

use super::{Check, CheckContext};
use crate::report::{CheckCategory, CheckOutcome};

/// Descriptive footprint metrics. Never fails.
#[derive(Debug, Default)]
pub struct PerformanceCheck;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Footprint {
    pub file_count: usize,
    pub total_bytes: u64,
    pub lines_of_code: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_bytes: Option<u64>,
}

impl Footprint {
    fn measure(root: &Path, eco: Ecosystem) -> Self {
        let mut footprint = Footprint::default();
        for entry in walk_files(root) {
            footprint.file_count += 1;
            footprint.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
        footprint.lines_of_code = count_lines_of_code(root, eco);
        footprint.binary_bytes = built_artifact_size(root);
        footprint
    }

    fn render(&self) -> String {
        let mut lines = vec![
            format!("Files: {}", self.file_count),
            format!(
                "Total size: {} bytes ({:.2} MB)",
                self.total_bytes,
                self.total_bytes as f64 / 1024.0 / 1024.0
            ),
            format!("Lines of code: {}", self.lines_of_code),
        ];
        if let Some(size) = self.binary_bytes {
            lines.push(format!(
                "Binary size: {} bytes ({:.2} MB)",
                size,
                size as f64 / 1024.0 / 1024.0
            ));
        }
        lines.join("\n")
    }
}

/// Non-blank, non-comment lines across the ecosystem's source files.
pub fn count_lines_of_code(root: &Path, eco: Ecosystem) -> usize {
    let prefix = eco.comment_prefix();
    files_with_extensions(root, eco.source_extensions())
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with(prefix))
                .count()
        })
        .sum()
}

/// Size of a compiled artifact left in the target: `app` or a binary named
/// after the directory.
fn built_artifact_size(root: &Path) -> Option<u64> {
    let mut candidates = vec![root.join(GO_SERVER_BINARY)];
    if let Some(name) = root.file_name() {
        candidates.push(root.join(name));
    }
    candidates
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .find(|m| m.is_file())
        .map(|m| m.len())
}

#[async_trait]
impl Check for PerformanceCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Performance
    }

    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let start = Instant::now();
        let root = ctx.target.path.clone();
        let eco = ctx.ecosystem;
        let footprint = tokio::task::spawn_blocking(move || Footprint::measure(&root, eco))
            .await
            .unwrap_or_default();

        CheckOutcome::pass(self.category(), footprint.render(), start.elapsed())
            .with_details(serde_json::to_value(&footprint).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_lines_of_code_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.go"),
            "package main\n\n// entry point\nfunc main() {\n}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not code\n").unwrap();
        assert_eq!(count_lines_of_code(dir.path(), Ecosystem::Go), 3);
    }

    #[test]
    fn test_footprint_with_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "# comment\nprint('hi')\n").unwrap();
        std::fs::write(dir.path().join(GO_SERVER_BINARY), vec![0u8; 2048]).unwrap();

        let fp = Footprint::measure(dir.path(), Ecosystem::Python);
        assert_eq!(fp.file_count, 2);
        assert_eq!(fp.lines_of_code, 1);
        assert_eq!(fp.binary_bytes, Some(2048));
        assert!(fp.render().contains("Binary size: 2048 bytes"));
    }
}
