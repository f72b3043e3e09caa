//! Build manifest sanity checks.
//!
//! A manifest that exists but cannot be understood is a defect of the target
//! (reported as a failure), unlike a missing manifest (reported as a skip).

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::ecosystem::Ecosystem;
use crate::error::ManifestError;

/// Check the manifest of `eco` in `dir`.
///
/// Returns `Ok(None)` when no manifest exists, `Ok(Some(path))` when it
/// exists and looks well-formed.
pub fn verify_manifest(eco: Ecosystem, dir: &Path) -> Result<Option<PathBuf>, ManifestError> {
    let Some(file) = eco.manifest() else {
        return Ok(None);
    };
    let path = dir.join(file);
    if !path.is_file() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path).map_err(|source| ManifestError::Unreadable {
        file: file.to_string(),
        source,
    })?;

    match eco {
        Ecosystem::Node | Ecosystem::Php => {
            let value: Value =
                serde_json::from_str(&content).map_err(|e| ManifestError::Malformed {
                    file: file.to_string(),
                    reason: e.to_string(),
                })?;
            if !value.is_object() {
                return Err(ManifestError::Malformed {
                    file: file.to_string(),
                    reason: "top-level value is not an object".to_string(),
                });
            }
        }
        Ecosystem::Go => {
            let declares_module = content
                .lines()
                .any(|l| l.trim_start().starts_with("module "));
            if !declares_module {
                return Err(ManifestError::Malformed {
                    file: file.to_string(),
                    reason: "missing module directive".to_string(),
                });
            }
        }
        Ecosystem::Java => {
            if !content.contains("<project") {
                return Err(ManifestError::Malformed {
                    file: file.to_string(),
                    reason: "missing <project> element".to_string(),
                });
            }
        }
        Ecosystem::Python | Ecosystem::Ruby | Ecosystem::Unknown => {}
    }

    Ok(Some(path))
}

/// Read `package.json` and return the named script, if declared.
///
/// Best-effort: unreadable or malformed manifests yield `None`.
pub fn npm_script(dir: &Path, script: &str) -> Option<String> {
    let content = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let value: Value = serde_json::from_str(&content).ok()?;
    value
        .get("scripts")?
        .get(script)?
        .as_str()
        .map(str::to_string)
}

/// `npm init` writes this placeholder test script; it always fails.
pub fn is_npm_placeholder_test(script: &str) -> bool {
    script.contains("no test specified")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(verify_manifest(Ecosystem::Node, dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_package_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{ \"name\": ").unwrap();
        let err = verify_manifest(Ecosystem::Node, dir.path()).unwrap_err();
        assert!(err.to_string().contains("package.json"));
    }

    #[test]
    fn test_go_mod_requires_module() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "go 1.21\n").unwrap();
        assert!(verify_manifest(Ecosystem::Go, dir.path()).is_err());

        std::fs::write(dir.path().join("go.mod"), "module example.com/app\n\ngo 1.21\n").unwrap();
        assert!(verify_manifest(Ecosystem::Go, dir.path()).unwrap().is_some());
    }

    #[test]
    fn test_npm_script_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"test": "jest", "start": "node index.js"}}"#,
        )
        .unwrap();
        assert_eq!(npm_script(dir.path(), "test").as_deref(), Some("jest"));
        assert!(npm_script(dir.path(), "lint").is_none());
    }

    #[test]
    fn test_npm_placeholder() {
        assert!(is_npm_placeholder_test(
            "echo \"Error: no test specified\" && exit 1"
        ));
        assert!(!is_npm_placeholder_test("jest --coverage"));
    }
}
