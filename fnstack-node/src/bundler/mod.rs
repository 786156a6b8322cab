//! Bundler abstraction
//!
//! The bundler is an external capability. A [`Bundler`] creates a
//! [`BuildContext`] holding one fixed configuration; the context is rebuilt
//! on demand and reports diagnostics plus the files each build consumed.

pub mod esbuild;

use async_trait::async_trait;
use fnstack_core::{Diagnostic, RuntimeError};
use std::path::PathBuf;

use crate::options::BuildOptions;

pub use esbuild::EsbuildCli;

/// Output of one rebuild
#[derive(Debug, Clone, Default)]
pub struct BundleResult {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    /// Raw dependency report (JSON with an `inputs` object)
    pub metafile: Option<String>,
    /// Directory relative report paths are resolved against
    pub working_dir: PathBuf,
}

impl BundleResult {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors followed by warnings
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.errors
            .iter()
            .chain(&self.warnings)
            .cloned()
            .collect()
    }
}

/// Persistent incremental state for one function
#[async_trait]
pub trait BuildContext: Send + Sync {
    /// Configuration the context was created with
    fn options(&self) -> &BuildOptions;

    /// Re-run the build with the context's configuration
    async fn rebuild(&mut self) -> BundleResult;

    /// Release any resources held by the context
    async fn dispose(&mut self);
}

/// Factory for build contexts
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn context(&self, options: BuildOptions) -> Result<Box<dyn BuildContext>, RuntimeError>;
}
