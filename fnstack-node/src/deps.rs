//! Dependency index
//!
//! The bundler's report lists every input file a build consumed, keyed by a
//! path relative to the directory the bundler ran in. The index answers
//! whether a changed file belongs to that set.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Deserialize)]
struct Metafile {
    inputs: HashMap<String, Value>,
}

/// Dependency report of one successful build
#[derive(Debug, Clone)]
pub struct DependencyReport {
    raw: String,
    working_dir: PathBuf,
}

impl DependencyReport {
    pub fn new(raw: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw: raw.into(),
            working_dir: working_dir.into(),
        }
    }

    /// Absolute input paths, or `None` when the report cannot be read
    pub fn inputs(&self) -> Option<BTreeSet<PathBuf>> {
        let metafile: Metafile = match serde_json::from_str(&self.raw) {
            Ok(metafile) => metafile,
            Err(e) => {
                debug!(error = %e, "Unreadable dependency report");
                return None;
            }
        };

        Some(
            metafile
                .inputs
                .keys()
                .map(|key| normalize(&self.working_dir.join(key)))
                .collect(),
        )
    }

    /// Whether `file` was an input. An unreadable report contains nothing.
    pub fn contains(&self, file: &Path) -> bool {
        let Some(inputs) = self.inputs() else {
            return false;
        };
        inputs.contains(&absolute(file))
    }
}

/// Absolute form of `path`, relative paths taken against the current directory
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize(&cwd.join(path)),
        Err(_) => normalize(path),
    }
}

/// Lexically remove `.` and `..` components
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "inputs": {
            "handlers/util.ts": { "bytes": 120, "imports": [] },
            "handlers/a.ts": { "bytes": 300, "imports": [{ "path": "handlers/util.ts" }] },
            "../shared/node_modules/lib/index.js": { "bytes": 10 }
        },
        "outputs": {}
    }"#;

    #[test]
    fn test_inputs_are_absolute() {
        let report = DependencyReport::new(REPORT, "/work/app");
        let inputs = report.inputs().unwrap();

        assert!(inputs.contains(Path::new("/work/app/handlers/util.ts")));
        assert!(inputs.contains(Path::new("/work/shared/node_modules/lib/index.js")));
        assert_eq!(inputs.len(), 3);
    }

    #[test]
    fn test_contains() {
        let report = DependencyReport::new(REPORT, "/work/app");

        assert!(report.contains(Path::new("/work/app/handlers/a.ts")));
        assert!(report.contains(Path::new("/work/app/handlers/../handlers/util.ts")));
        assert!(!report.contains(Path::new("/work/app/handlers/other.ts")));
    }

    #[test]
    fn test_unreadable_report_contains_nothing() {
        let report = DependencyReport::new("not json", "/work/app");
        assert!(report.inputs().is_none());
        assert!(!report.contains(Path::new("/work/app/handlers/a.ts")));

        let report = DependencyReport::new(r#"{"outputs":{}}"#, "/work/app");
        assert!(!report.contains(Path::new("/work/app/handlers/a.ts")));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }
}
