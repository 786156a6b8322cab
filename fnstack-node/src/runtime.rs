//! Node.js runtime

use async_trait::async_trait;
use fnstack_core::{
    BuildInput, BuildOutput, FunctionId, Project, RunInput, Runtime, RuntimeError, Worker,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::builder::{BuildResult, Builder};
use crate::bundler::{Bundler, EsbuildCli};
use crate::worker::{HostCommand, NodeWorker, WorkerManager};

/// Builds Node handlers with the bundler and runs them in host processes
pub struct NodeRuntime {
    builder: Builder,
    workers: WorkerManager,
}

impl NodeRuntime {
    /// Runtime using `esbuild` and `node` from `PATH`
    pub fn new(project: Project) -> Self {
        let host = HostCommand::node("node", &project.platform_dir);
        Self::with_parts(project, Arc::new(EsbuildCli::default()), host)
    }

    pub fn with_parts(project: Project, bundler: Arc<dyn Bundler>, host: HostCommand) -> Self {
        Self {
            builder: Builder::new(project, bundler),
            workers: WorkerManager::new(host),
        }
    }

    pub fn project(&self) -> &Project {
        self.builder.project()
    }

    /// Start a worker, keeping the concrete handle
    pub fn spawn(&self, input: RunInput) -> Result<NodeWorker, RuntimeError> {
        self.workers.spawn(input)
    }

    /// Inputs of the function's last successful build, sorted
    pub fn dependencies(&self, function_id: &FunctionId) -> Option<BTreeSet<PathBuf>> {
        self.builder.dependencies(function_id)
    }

    pub fn last_result(&self, function_id: &FunctionId) -> Option<BuildResult> {
        self.builder.last_result(function_id)
    }

    /// Release the build state of a function that is being torn down
    pub async fn dispose(&self, function_id: &FunctionId) -> bool {
        self.builder.dispose(function_id).await
    }

    pub async fn dispose_all(&self) {
        self.builder.dispose_all().await;
    }
}

#[async_trait]
impl Runtime for NodeRuntime {
    fn matches(&self, runtime: &str) -> bool {
        runtime.starts_with("node")
    }

    async fn build(&self, input: &BuildInput) -> Result<BuildOutput, RuntimeError> {
        self.builder.build(input).await
    }

    async fn run(&self, input: RunInput) -> Result<Box<dyn Worker>, RuntimeError> {
        Ok(Box::new(self.workers.spawn(input)?))
    }

    fn should_rebuild(&self, function_id: &FunctionId, file: &Path) -> bool {
        self.builder.should_rebuild(function_id, file)
    }
}
