//! Build orchestration
//!
//! The [`Builder`] owns one bundler context per function. A context is
//! created on the first build of a function with the configuration resolved
//! from that build's properties, and every later build of the same function
//! reruns it unchanged.
//!
//! Functions live in a `DashMap` of slots. Each slot serialises the builds of
//! its function behind an async mutex, so builds of different functions run
//! in parallel while a function never has two builds in flight. Slots are
//! released explicitly through [`Builder::dispose`].

use dashmap::DashMap;
use fnstack_core::{BuildInput, BuildOutput, Diagnostic, FunctionId, Project, RuntimeError};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::bundler::{BuildContext, Bundler};
use crate::deps::DependencyReport;
use crate::fs::{find_up, symlink_dir};
use crate::handler::resolve_handler;
use crate::options::build_options;
use crate::properties::NodeProperties;

const DEPENDENCY_DIR: &str = "node_modules";

/// Latest build of one function; replaced on every rebuild
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub artifact: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
    /// Report of this build, if it succeeded
    pub report: Option<DependencyReport>,
}

#[derive(Default)]
struct FunctionSlot {
    context: Mutex<Option<Box<dyn BuildContext>>>,
    state: RwLock<SlotState>,
}

#[derive(Default)]
struct SlotState {
    last: Option<BuildResult>,
    /// Report of the last successful build
    report: Option<DependencyReport>,
}

/// Per-function incremental builder
pub struct Builder {
    project: Project,
    bundler: Arc<dyn Bundler>,
    functions: DashMap<FunctionId, Arc<FunctionSlot>>,
}

impl Builder {
    pub fn new(project: Project, bundler: Arc<dyn Bundler>) -> Self {
        Self {
            project,
            bundler,
            functions: DashMap::new(),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    fn slot(&self, function_id: &FunctionId) -> Arc<FunctionSlot> {
        self.functions
            .entry(function_id.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Build one function, reusing its context when one exists
    pub async fn build(&self, input: &BuildInput) -> Result<BuildOutput, RuntimeError> {
        let file = resolve_handler(self.project.root(), &input.handler)?;
        let out_dir = self.project.out_dir(&input.function_id);

        info!(
            function_id = %input.function_id,
            handler = %input.handler,
            file = %file.display(),
            "Building function"
        );

        let slot = self.slot(&input.function_id);
        let mut guard = slot.context.lock().await;

        // The context never leaves its slot, even if this future is dropped
        let context = match &mut *guard {
            Some(context) => context,
            empty @ None => {
                let props = NodeProperties::from_value(&input.properties);
                let options = build_options(self.project.root(), &file, &out_dir, &props);
                debug!(function_id = %input.function_id, options = ?options, "Creating build context");
                empty.insert(self.bundler.context(options).await?)
            }
        };

        let bundle = context.rebuild().await;
        let artifact = context.options().outfile.clone();

        for message in &bundle.errors {
            error!(function_id = %input.function_id, error = %message, "Bundler error");
        }
        for message in &bundle.warnings {
            warn!(function_id = %input.function_id, warning = %message, "Bundler warning");
        }

        let diagnostics = bundle.diagnostics();
        let report = if bundle.succeeded() {
            bundle
                .metafile
                .as_ref()
                .map(|raw| DependencyReport::new(raw.clone(), bundle.working_dir.clone()))
        } else {
            None
        };

        {
            let mut state = slot.state.write();
            if report.is_some() {
                state.report = report.clone();
            }
            state.last = Some(BuildResult {
                artifact: artifact.clone(),
                diagnostics: diagnostics.clone(),
                report,
            });
        }
        drop(guard);

        link_dependency_dir(&file, &out_dir);

        info!(
            function_id = %input.function_id,
            artifact = %artifact.display(),
            diagnostics = diagnostics.len(),
            "Built function"
        );

        Ok(BuildOutput {
            function_id: input.function_id.clone(),
            handler: input.handler.clone(),
            out_dir,
            artifact,
            diagnostics,
        })
    }

    /// Whether `file` is an input of the function's last successful build.
    ///
    /// Without a readable report the answer is `false`, so a function whose
    /// report is missing is never rebuilt on file changes.
    pub fn should_rebuild(&self, function_id: &FunctionId, file: &Path) -> bool {
        let Some(slot) = self.functions.get(function_id).map(|s| s.value().clone()) else {
            return false;
        };
        let state = slot.state.read();
        state
            .report
            .as_ref()
            .is_some_and(|report| report.contains(file))
    }

    /// Inputs of the function's last successful build
    pub fn dependencies(&self, function_id: &FunctionId) -> Option<BTreeSet<PathBuf>> {
        let slot = self.functions.get(function_id)?.value().clone();
        let state = slot.state.read();
        state.report.as_ref()?.inputs()
    }

    /// The function's most recent build
    pub fn last_result(&self, function_id: &FunctionId) -> Option<BuildResult> {
        let slot = self.functions.get(function_id)?.value().clone();
        let state = slot.state.read();
        state.last.clone()
    }

    /// Drop a function's context and results. Returns whether it was known.
    pub async fn dispose(&self, function_id: &FunctionId) -> bool {
        let Some((_, slot)) = self.functions.remove(function_id) else {
            return false;
        };
        if let Some(mut context) = slot.context.lock().await.take() {
            context.dispose().await;
        }
        debug!(function_id = %function_id, "Disposed build context");
        true
    }

    /// Dispose every function
    pub async fn dispose_all(&self) {
        let ids: Vec<FunctionId> = self.functions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.dispose(&id).await;
        }
    }

    /// Number of functions holding state
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Link the nearest dependency directory above `file` into `out_dir`.
/// Failures are ignored.
fn link_dependency_dir(file: &Path, out_dir: &Path) {
    let Some(target) = find_up(file, DEPENDENCY_DIR) else {
        return;
    };
    let link = out_dir.join(DEPENDENCY_DIR);
    let result = std::fs::create_dir_all(out_dir).and_then(|()| symlink_dir(&target, &link));
    match result {
        Ok(()) => debug!(target = %target.display(), link = %link.display(), "Linked dependencies"),
        Err(e) => debug!(error = %e, link = %link.display(), "Skipped dependency link"),
    }
}
