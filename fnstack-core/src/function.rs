//! Function identity and project layout

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable key identifying one deployable function across builds
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory-safe form of the identifier.
    ///
    /// Identifiers that are already safe are used as-is. Others have unsafe
    /// characters replaced by `_` and gain a digest suffix of the original,
    /// so `a/b` and `a_b` never share a directory.
    pub fn dir_name(&self) -> String {
        let sanitized: String = self
            .0
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c => c,
            })
            .collect();

        if sanitized == self.0 {
            return sanitized;
        }
        let digest = Sha256::digest(self.0.as_bytes());
        format!("{sanitized}-{}", &hex::encode(digest)[..8])
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for FunctionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Filesystem layout of the project whose functions are built and run
#[derive(Debug, Clone)]
pub struct Project {
    /// Project root; handler specs are relative to it
    pub root: PathBuf,
    /// Platform directory holding the bundled worker entry scripts
    pub platform_dir: PathBuf,
    /// Parent of every per-function output directory
    pub artifacts_dir: PathBuf,
}

impl Project {
    /// Project rooted at `root` with the default `.fnstack` layout
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            platform_dir: root.join(".fnstack").join("platform"),
            artifacts_dir: root.join(".fnstack").join("artifacts"),
            root,
        }
    }

    pub fn with_platform_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.platform_dir = dir.into();
        self
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Private output directory of one function
    pub fn out_dir(&self, function_id: &FunctionId) -> PathBuf {
        self.artifacts_dir.join(function_id.dir_name())
    }
}
