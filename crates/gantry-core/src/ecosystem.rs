//! Ecosystem detection from filesystem evidence.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Language/toolchain identity of a target directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Ecosystem {
    Go,
    Node,
    Python,
    Java,
    Php,
    Ruby,
    Unknown,
}

/// Identity used when no marker file is present.
pub const DEFAULT_ECOSYSTEM: Ecosystem = Ecosystem::Go;

/// Marker files in priority order. First match wins.
pub const MARKERS: &[(&str, Ecosystem)] = &[
    ("package.json", Ecosystem::Node),
    ("go.mod", Ecosystem::Go),
    ("requirements.txt", Ecosystem::Python),
    ("pom.xml", Ecosystem::Java),
    ("composer.json", Ecosystem::Php),
    ("Gemfile", Ecosystem::Ruby),
];

/// Subdirectories probed when the top level carries no marker.
const CONVENTIONAL_SUBDIRS: &[&str] = &["src", "app", "server", "backend", "api"];

impl Ecosystem {
    pub const ALL: [Ecosystem; 7] = [
        Ecosystem::Go,
        Ecosystem::Node,
        Ecosystem::Python,
        Ecosystem::Java,
        Ecosystem::Php,
        Ecosystem::Ruby,
        Ecosystem::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Go => "go",
            Ecosystem::Node => "node",
            Ecosystem::Python => "python",
            Ecosystem::Java => "java",
            Ecosystem::Php => "php",
            Ecosystem::Ruby => "ruby",
            Ecosystem::Unknown => "unknown",
        }
    }

    /// Interpret a caller-declared language. Unrecognised names map to `Unknown`.
    pub fn from_declared(declared: &str) -> Self {
        match declared.trim().to_lowercase().as_str() {
            "go" | "golang" => Ecosystem::Go,
            "node" | "nodejs" | "node.js" | "javascript" | "js" | "typescript" | "ts" => {
                Ecosystem::Node
            }
            "python" | "py" | "python3" => Ecosystem::Python,
            "java" => Ecosystem::Java,
            "php" => Ecosystem::Php,
            "ruby" | "rb" => Ecosystem::Ruby,
            _ => Ecosystem::Unknown,
        }
    }

    /// The manifest file that identifies this ecosystem.
    pub fn manifest(&self) -> Option<&'static str> {
        MARKERS
            .iter()
            .find(|(_, eco)| eco == self)
            .map(|(file, _)| *file)
    }

    /// Source file extensions scanned for this ecosystem.
    pub fn source_extensions(&self) -> &'static [&'static str] {
        match self {
            Ecosystem::Go => &["go"],
            Ecosystem::Node => &["js", "mjs", "cjs", "jsx", "ts", "tsx"],
            Ecosystem::Python => &["py"],
            Ecosystem::Java => &["java"],
            Ecosystem::Php => &["php"],
            Ecosystem::Ruby => &["rb"],
            Ecosystem::Unknown => &[
                "go", "js", "mjs", "ts", "py", "java", "php", "rb",
            ],
        }
    }

    /// Single-line comment prefix, used when counting lines of code.
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Ecosystem::Python | Ecosystem::Ruby => "#",
            _ => "//",
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the ecosystem of `path`.
///
/// A non-empty `declared` language is trusted without touching the
/// filesystem. Otherwise marker files are probed at the top level and then in
/// a few conventional subdirectories; with no marker the default identity is
/// returned rather than an error.
pub fn detect(path: &Path, declared: Option<&str>) -> Ecosystem {
    if let Some(lang) = declared.map(str::trim).filter(|l| !l.is_empty()) {
        let eco = Ecosystem::from_declared(lang);
        debug!(path = %path.display(), declared = %lang, ecosystem = %eco, "using declared language");
        return eco;
    }

    if let Some(eco) = probe_markers(path) {
        debug!(path = %path.display(), ecosystem = %eco, "detected from marker file");
        return eco;
    }

    for sub in CONVENTIONAL_SUBDIRS {
        let nested = path.join(sub);
        // symlink_metadata so a symlinked subdir is never followed
        let is_real_dir = std::fs::symlink_metadata(&nested)
            .map(|m| m.file_type().is_dir())
            .unwrap_or(false);
        if is_real_dir {
            if let Some(eco) = probe_markers(&nested) {
                debug!(path = %nested.display(), ecosystem = %eco, "detected from nested marker file");
                return eco;
            }
        }
    }

    debug!(path = %path.display(), ecosystem = %DEFAULT_ECOSYSTEM, "no marker file, using default");
    DEFAULT_ECOSYSTEM
}

fn probe_markers(dir: &Path) -> Option<Ecosystem> {
    MARKERS
        .iter()
        .find(|(file, _)| dir.join(file).is_file())
        .map(|(_, eco)| *eco)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_json_is_node() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect(dir.path(), None), Ecosystem::Node);
    }

    #[test]
    fn test_empty_dir_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect(dir.path(), None), DEFAULT_ECOSYSTEM);
    }

    #[test]
    fn test_priority_order_node_before_go() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module x").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect(dir.path(), None), Ecosystem::Node);
    }

    #[test]
    fn test_declared_language_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect(dir.path(), Some("Python")), Ecosystem::Python);
        assert_eq!(detect(dir.path(), Some("  ")), Ecosystem::Node);
    }

    #[test]
    fn test_declared_aliases() {
        assert_eq!(Ecosystem::from_declared("JavaScript"), Ecosystem::Node);
        assert_eq!(Ecosystem::from_declared("golang"), Ecosystem::Go);
        assert_eq!(Ecosystem::from_declared("cobol"), Ecosystem::Unknown);
    }

    #[test]
    fn test_nested_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("server")).unwrap();
        std::fs::write(dir.path().join("server/Gemfile"), "source 'x'").unwrap();
        assert_eq!(detect(dir.path(), None), Ecosystem::Ruby);
    }

    #[test]
    fn test_manifest_lookup() {
        assert_eq!(Ecosystem::Php.manifest(), Some("composer.json"));
        assert_eq!(Ecosystem::Unknown.manifest(), None);
    }
}
