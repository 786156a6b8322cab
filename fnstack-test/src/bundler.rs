//! Fake bundler
//!
//! Follows relative `import`/`export ... from` specifiers starting at the
//! entry point, writes the concatenated sources to the output file and
//! reports every file it visited as an input.

use async_trait::async_trait;
use fnstack_core::{Diagnostic, RuntimeError};
use fnstack_node::handler::NODE_EXTENSIONS;
use fnstack_node::{BuildContext, BuildOptions, BundleResult, Bundler};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static RELATIVE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:from|import)\s*['"](\.{1,2}/[^'"]+)['"]"#).expect("valid import pattern")
});

#[derive(Default)]
struct State {
    contexts: Mutex<Vec<BuildOptions>>,
    rebuilds: AtomicUsize,
    disposed: AtomicUsize,
    errors: Mutex<Vec<Diagnostic>>,
    warnings: Mutex<Vec<Diagnostic>>,
}

/// In-process stand-in for the bundler
#[derive(Clone, Default)]
pub struct FakeBundler {
    state: Arc<State>,
}

impl FakeBundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle usable as a runtime's bundler
    pub fn shared(&self) -> Arc<dyn Bundler> {
        Arc::new(self.clone())
    }

    /// Options of every context created so far
    pub fn contexts(&self) -> Vec<BuildOptions> {
        self.state.contexts.lock().clone()
    }

    pub fn rebuilds(&self) -> usize {
        self.state.rebuilds.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// Make following rebuilds fail with `errors`
    pub fn fail_with(&self, errors: Vec<Diagnostic>) {
        *self.state.errors.lock() = errors;
    }

    /// Attach `warnings` to following rebuilds
    pub fn warn_with(&self, warnings: Vec<Diagnostic>) {
        *self.state.warnings.lock() = warnings;
    }

    /// Clear injected errors and warnings
    pub fn succeed(&self) {
        self.state.errors.lock().clear();
        self.state.warnings.lock().clear();
    }
}

#[async_trait]
impl Bundler for FakeBundler {
    async fn context(&self, options: BuildOptions) -> Result<Box<dyn BuildContext>, RuntimeError> {
        self.state.contexts.lock().push(options.clone());
        Ok(Box::new(FakeContext {
            options,
            state: self.state.clone(),
        }))
    }
}

struct FakeContext {
    options: BuildOptions,
    state: Arc<State>,
}

#[async_trait]
impl BuildContext for FakeContext {
    fn options(&self) -> &BuildOptions {
        &self.options
    }

    async fn rebuild(&mut self) -> BundleResult {
        self.state.rebuilds.fetch_add(1, Ordering::SeqCst);

        let mut result = BundleResult {
            errors: self.state.errors.lock().clone(),
            warnings: self.state.warnings.lock().clone(),
            metafile: None,
            working_dir: self.options.working_dir.clone(),
        };
        if !result.errors.is_empty() {
            return result;
        }

        let inputs = collect_inputs(&self.options.entry_point);

        if self.options.write {
            let mut bundle = self.options.banner.clone().unwrap_or_default();
            for input in &inputs {
                bundle.push('\n');
                bundle.push_str(&std::fs::read_to_string(input).unwrap_or_default());
            }
            let written = self
                .options
                .outfile
                .parent()
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|()| std::fs::write(&self.options.outfile, bundle));
            if let Err(e) = written {
                result.errors.push(Diagnostic::error(format!("write failed: {e}")));
                return result;
            }
        }

        let mut report = Map::new();
        for input in &inputs {
            let key = input
                .strip_prefix(&self.options.working_dir)
                .unwrap_or(input)
                .to_string_lossy()
                .into_owned();
            let bytes = std::fs::metadata(input).map(|m| m.len()).unwrap_or(0);
            report.insert(key, json!({ "bytes": bytes, "imports": [] }));
        }
        result.metafile = Some(json!({ "inputs": report, "outputs": {} }).to_string());
        result
    }

    async fn dispose(&mut self) {
        self.state.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Entry point plus every file reachable through relative imports
fn collect_inputs(entry: &Path) -> Vec<PathBuf> {
    let mut seen = vec![entry.to_path_buf()];
    let mut queue = VecDeque::from([entry.to_path_buf()]);

    while let Some(file) = queue.pop_front() {
        let Ok(source) = std::fs::read_to_string(&file) else {
            continue;
        };
        let dir = file.parent().unwrap_or(Path::new(""));
        for caps in RELATIVE_IMPORT.captures_iter(&source) {
            let Some(resolved) = resolve_import(dir, &caps[1]) else {
                continue;
            };
            if !seen.contains(&resolved) {
                seen.push(resolved.clone());
                queue.push_back(resolved);
            }
        }
    }
    seen
}

fn resolve_import(dir: &Path, specifier: &str) -> Option<PathBuf> {
    let base = fnstack_node::deps::normalize(&dir.join(specifier));
    if base.is_file() {
        return Some(base);
    }
    NODE_EXTENSIONS.iter().find_map(|ext| {
        let mut candidate = base.clone().into_os_string();
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        candidate.is_file().then_some(candidate)
    })
}
