//! Bounded, read-only probing of a source tree.
//!
//! Walks never follow symlinks and never descend into dependency or VCS
//! directories, so a target containing `node_modules` or a symlink loop is
//! still scanned in bounded time.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Deepest level a source walk descends to.
pub const MAX_WALK_DEPTH: usize = 12;

/// Directory names that are never scanned.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".idea",
    ".vscode",
];

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Iterate regular files under `root`, skipping ignored directories.
pub fn walk_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .follow_links(false)
        .max_depth(MAX_WALK_DEPTH)
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

/// Return `true` if any file under `root` satisfies `pred`.
pub fn any_file<F>(root: &Path, mut pred: F) -> bool
where
    F: FnMut(&Path) -> bool,
{
    walk_files(root).any(|e| pred(e.path()))
}

/// Collect files under `root` whose extension is in `extensions`.
pub fn files_with_extensions(root: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    walk_files(root)
        .filter(|e| has_extension(e.path(), extensions))
        .map(|e| e.into_path())
        .collect()
}

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

pub fn file_name(path: &Path) -> &str {
    path.file_name().and_then(OsStr::to_str).unwrap_or("")
}

/// Locate `program` on the host's `PATH`.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_skips_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(dir.path().join("app.js"), "x").unwrap();

        let files = files_with_extensions(dir.path(), &["js"]);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("app.js"));
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_terminates_on_symlink_loop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("a/loop")).unwrap();
        std::fs::write(dir.path().join("a/main.go"), "package main").unwrap();

        let files = files_with_extensions(dir.path(), &["go"]);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_has_extension_case_insensitive() {
        assert!(has_extension(Path::new("A.PY"), &["py"]));
        assert!(!has_extension(Path::new("Makefile"), &["py"]));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executable_sh() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("definitely-not-a-real-tool-xyz").is_none());
    }
}
