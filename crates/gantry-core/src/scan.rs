//! Heuristic security scan of a source tree.
//!
//! Two rule families are applied line by line: SQL assembled by string
//! concatenation or formatting, and literal secrets assigned to well-known
//! key names. The scan is a pattern match, not an analysis; it reports what
//! looks suspicious and leaves judgement to the reader.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ecosystem::Ecosystem;
use crate::probe;

/// Files larger than this are not scanned (generated bundles, fixtures).
const MAX_SCAN_BYTES: u64 = 1024 * 1024;

const MAX_EXCERPT_CHARS: usize = 120;

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanRule {
    /// A query string built by concatenation or string formatting.
    SqlConcatenation,
    /// A literal credential assigned to a password/key/token name.
    HardcodedSecret,
}

impl ScanRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanRule::SqlConcatenation => "sql_concatenation",
            ScanRule::HardcodedSecret => "hardcoded_secret",
        }
    }
}

impl std::fmt::Display for ScanRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One suspicious line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    /// Path relative to the scanned root.
    pub file: PathBuf,
    /// 1-based line number.
    pub line: usize,
    pub rule: ScanRule,
    /// The offending line with any literal secret redacted.
    pub excerpt: String,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} [{}] {}",
            self.file.display(),
            self.line,
            self.rule,
            self.excerpt
        )
    }
}

struct Patterns {
    sql: Vec<Regex>,
    secrets: Vec<Regex>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).ok();
        Patterns {
            sql: [
                // "SELECT ... " + value
                r#"(?i)["'`]\s*(select|insert|update|delete)\b[^"'`]*["'`]\s*(\+|\.\s)"#,
                // value + " WHERE ..."
                r#"(?i)\+\s*["'`][^"'`]*\b(where|values|from|set)\b"#,
                // fmt.Sprintf / String.format / % formatting of a query
                r#"(?i)(sprintf|format)\s*\(\s*["'`]\s*(select|insert|update|delete)\b"#,
                r#"(?i)["']\s*(select|insert|update|delete)\b[^"']*%[sd][^"']*["']\s*%"#,
                // python f-strings / template literals interpolating into a query
                r#"(?i)\bf["']\s*(select|insert|update|delete)\b[^"']*\{"#,
                r#"(?i)`\s*(select|insert|update|delete)\b[^`]*\$\{"#,
            ]
            .iter()
            .filter_map(|p| compile(p))
            .collect(),
            secrets: [
                r#"(?i)(password|passwd|pwd)["']?\s*(:=|=|:)\s*["']([^"'\s]{8,})["']"#,
                r#"(?i)(api[_-]?key|secret[_-]?key|access[_-]?token|auth[_-]?token|token)["']?\s*(:=|=|:)\s*["']([^"'\s]{10,})["']"#,
            ]
            .iter()
            .filter_map(|p| compile(p))
            .collect(),
        }
    })
}

/// Scan a single line. `file` is recorded verbatim on each finding.
pub fn scan_line(file: &Path, line_no: usize, line: &str) -> Vec<Finding> {
    let pats = patterns();
    let mut findings = Vec::new();

    if pats.sql.iter().any(|re| re.is_match(line)) {
        findings.push(Finding {
            file: file.to_path_buf(),
            line: line_no,
            rule: ScanRule::SqlConcatenation,
            excerpt: excerpt(line),
        });
    }

    for re in &pats.secrets {
        if let Some(caps) = re.captures(line) {
            let redacted = match caps.get(3) {
                Some(secret) => line.replacen(secret.as_str(), REDACTED, 1),
                None => line.to_string(),
            };
            findings.push(Finding {
                file: file.to_path_buf(),
                line: line_no,
                rule: ScanRule::HardcodedSecret,
                excerpt: excerpt(&redacted),
            });
            break;
        }
    }

    findings
}

/// Scan one file's contents.
pub fn scan_source(file: &Path, content: &str) -> Vec<Finding> {
    content
        .lines()
        .enumerate()
        .flat_map(|(idx, line)| scan_line(file, idx + 1, line))
        .collect()
}

/// Scan every source file of `eco` under `root`.
///
/// Unreadable, oversized or non-UTF-8 files are skipped silently.
pub fn scan_tree(root: &Path, eco: Ecosystem) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut scanned = 0usize;

    for path in probe::files_with_extensions(root, eco.source_extensions()) {
        let too_big = std::fs::metadata(&path)
            .map(|m| m.len() > MAX_SCAN_BYTES)
            .unwrap_or(true);
        if too_big {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let relative = path.strip_prefix(root).unwrap_or(&path);
        findings.extend(scan_source(relative, &content));
        scanned += 1;
    }

    debug!(root = %root.display(), ecosystem = %eco, files = scanned, findings = findings.len(), "security scan complete");
    findings
}

fn excerpt(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MAX_EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}
