//! Runtime abstraction shared by every language runtime

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::function::FunctionId;

/// Severity of a bundler diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Source position attached to a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// A non-fatal message produced while building
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.location = Some(Location {
            file: file.into(),
            line,
            column,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Renders `<message> [<file>:<line>:<col>]`, or the bare message without a location
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(
                f,
                "{} [{}:{}:{}]",
                self.message, loc.file, loc.line, loc.column
            ),
            None => f.write_str(&self.message),
        }
    }
}

/// Request to build one function
#[derive(Debug, Clone)]
pub struct BuildInput {
    pub function_id: FunctionId,
    /// Handler spec, `<dir>/<basename>.<export>`
    pub handler: String,
    /// Runtime-specific build properties, parsed permissively
    pub properties: serde_json::Value,
}

impl BuildInput {
    pub fn new(function_id: impl Into<FunctionId>, handler: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
            handler: handler.into(),
            properties: serde_json::Value::Null,
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Outcome of a structurally complete build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub function_id: FunctionId,
    pub handler: String,
    /// Function-private output directory
    pub out_dir: PathBuf,
    /// Bundled file written by the build
    pub artifact: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Diagnostics rendered for display, in bundler order
    pub fn messages(&self) -> Vec<String> {
        self.diagnostics.iter().map(ToString::to_string).collect()
    }
}

/// Request to start one worker process
#[derive(Debug, Clone)]
pub struct RunInput {
    /// First positional argument handed to the worker entry script
    pub artifact: PathBuf,
    /// Working directory of the worker process
    pub work_dir: PathBuf,
    pub worker_id: String,
    /// Complete environment of the worker, before runtime additions
    pub env: BTreeMap<String, String>,
    /// Control-plane endpoint the worker reports back to
    pub server: String,
    /// Cancelling this token terminates the worker's process tree
    pub cancel: CancellationToken,
}

impl RunInput {
    /// Run input for the artifact of `build`, addressed by its handler spec
    pub fn for_build(
        build: &BuildOutput,
        worker_id: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            artifact: build.out_dir.join(&build.handler),
            work_dir: build.out_dir.clone(),
            worker_id: worker_id.into(),
            env: BTreeMap::new(),
            server: server.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Merged output of a worker, ending once every source is drained
pub type LogReader = Box<dyn AsyncRead + Send + Unpin>;

/// A supervised worker process
#[async_trait]
pub trait Worker: Send + Sync {
    /// Request termination of the worker and everything it spawned
    fn stop(&self);

    /// Merged standard output and standard error
    fn logs(&self) -> LogReader;

    /// Resolves once the worker process has exited
    async fn wait(&self);
}

/// A language runtime able to build and run functions
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Whether this runtime serves the given runtime tag
    fn matches(&self, runtime: &str) -> bool;

    async fn build(&self, input: &BuildInput) -> Result<BuildOutput, RuntimeError>;

    async fn run(&self, input: RunInput) -> Result<Box<dyn Worker>, RuntimeError>;

    /// Whether a change to `file` affects the last successful build of `function_id`
    fn should_rebuild(&self, function_id: &FunctionId, file: &Path) -> bool;
}
