//! esbuild command-line backend
//!
//! Each rebuild runs the `esbuild` binary with the flags derived from the
//! context's options. Messages are parsed from the plain-text log on stderr
//! and the dependency report is read back from the metafile.

use async_trait::async_trait;
use fnstack_core::{Diagnostic, RuntimeError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{BuildContext, BundleResult, Bundler};
use crate::options::{BuildOptions, SourceMap};

static MESSAGE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:✘|X|▲)\s+\[(ERROR|WARNING)\]\s+(.*?)\s*$").expect("valid header pattern")
});

static MESSAGE_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+(\S.*?):(\d+):(\d+):\s*$").expect("valid location pattern"));

/// Bundler backed by the `esbuild` executable
#[derive(Debug, Clone)]
pub struct EsbuildCli {
    binary: PathBuf,
}

impl Default for EsbuildCli {
    fn default() -> Self {
        Self::new("esbuild")
    }
}

impl EsbuildCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the binary can be executed
    async fn version(&self) -> Result<String, RuntimeError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| RuntimeError::Bundler(format!("{}: {e}", self.binary.display())))?;

        if !output.status.success() {
            return Err(RuntimeError::Bundler(format!(
                "{} --version exited with {}",
                self.binary.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Bundler for EsbuildCli {
    async fn context(&self, options: BuildOptions) -> Result<Box<dyn BuildContext>, RuntimeError> {
        let version = self.version().await?;
        debug!(version = %version, entry = %options.entry_point.display(), "Created esbuild context");

        if !options.plugins.is_empty() {
            warn!(plugins = ?options.plugins, "esbuild CLI cannot load plugin modules");
        }

        Ok(Box::new(EsbuildContext {
            binary: self.binary.clone(),
            args: command_args(&options),
            metafile: metafile_path(&options.outfile),
            options,
        }))
    }
}

struct EsbuildContext {
    binary: PathBuf,
    options: BuildOptions,
    args: Vec<OsString>,
    metafile: PathBuf,
}

#[async_trait]
impl BuildContext for EsbuildContext {
    fn options(&self) -> &BuildOptions {
        &self.options
    }

    async fn rebuild(&mut self) -> BundleResult {
        let mut result = BundleResult {
            working_dir: self.options.working_dir.clone(),
            ..Default::default()
        };

        for plugin in &self.options.plugins {
            result.warnings.push(Diagnostic::warning(format!(
                "Plugin module {} was not applied: the esbuild CLI does not load plugins",
                plugin.display()
            )));
        }

        // A failed build must not leave the previous report behind
        let _ = tokio::fs::remove_file(&self.metafile).await;

        let output = match Command::new(&self.binary)
            .args(&self.args)
            .current_dir(&self.options.working_dir)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                result
                    .errors
                    .push(Diagnostic::error(format!("Failed to run esbuild: {e}")));
                return result;
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let (errors, warnings) = parse_messages(&stderr);
        result.errors.extend(errors);
        result.warnings.extend(warnings);

        if !output.status.success() && result.errors.is_empty() {
            let text = stderr.trim();
            result.errors.push(Diagnostic::error(if text.is_empty() {
                format!("esbuild exited with {}", output.status)
            } else {
                text.to_string()
            }));
        }

        if result.succeeded() && self.options.metafile {
            match tokio::fs::read_to_string(&self.metafile).await {
                Ok(report) => result.metafile = Some(report),
                Err(e) => debug!(error = %e, path = %self.metafile.display(), "No metafile"),
            }
        }

        result
    }

    async fn dispose(&mut self) {
        let _ = tokio::fs::remove_file(&self.metafile).await;
    }
}

/// Report file written next to the bundle
fn metafile_path(outfile: &Path) -> PathBuf {
    let mut name = outfile.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Command-line flags for `options`
pub fn command_args(options: &BuildOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![options.entry_point.clone().into_os_string()];
    let mut flag = |value: String| args.push(OsString::from(value));

    if options.bundle {
        flag("--bundle".to_string());
    }
    flag(format!("--platform={}", options.platform));
    flag(format!("--format={}", options.format.as_str()));
    if !options.target.is_empty() {
        flag(format!("--target={}", options.target.join(",")));
    }
    if !options.main_fields.is_empty() {
        flag(format!("--main-fields={}", options.main_fields.join(",")));
    }
    if !options.conditions.is_empty() {
        flag(format!("--conditions={}", options.conditions.join(",")));
    }
    if let Some(banner) = &options.banner {
        flag(format!("--banner:js={banner}"));
    }
    for name in &options.external {
        flag(format!("--external:{name}"));
    }
    for (ext, loader) in &options.loader {
        flag(format!("--loader:{ext}={}", loader.as_str()));
    }
    for (key, value) in &options.define {
        flag(format!("--define:{key}={value}"));
    }
    if options.source_map == SourceMap::Linked {
        flag("--sourcemap=linked".to_string());
    }
    if let Some(sources_content) = options.sources_content {
        flag(format!("--sources-content={sources_content}"));
    }
    if options.keep_names {
        flag("--keep-names".to_string());
    }
    if options.minify {
        flag("--minify-whitespace".to_string());
        flag("--minify-syntax".to_string());
        flag("--minify-identifiers".to_string());
    }
    if options.metafile {
        flag(format!("--metafile={}", metafile_path(&options.outfile).display()));
    }
    if !options.write {
        flag("--write=false".to_string());
    }
    match (options.splitting, options.outfile.parent()) {
        // esbuild rejects --splitting with --outfile; write to the outfile's
        // directory under the outfile's name instead. Splitting still needs
        // the esm format.
        (true, Some(dir)) => {
            let ext = options.format.extension();
            flag("--splitting".to_string());
            flag(format!("--outdir={}", dir.display()));
            flag("--entry-names=[name]".to_string());
            flag(format!("--out-extension:.js=.{ext}"));
        }
        _ => flag(format!("--outfile={}", options.outfile.display())),
    }
    flag("--color=false".to_string());
    flag("--log-level=warning".to_string());

    args
}

/// Parse esbuild's text log into errors and warnings.
///
/// A message starts at a `✘ [ERROR]` or `▲ [WARNING]` header; the first
/// `file:line:col:` line that follows becomes its location.
pub fn parse_messages(log: &str) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
    let mut messages: Vec<Diagnostic> = Vec::new();

    for line in log.lines() {
        if let Some(caps) = MESSAGE_HEADER.captures(line) {
            let text = caps[2].to_string();
            messages.push(if &caps[1] == "ERROR" {
                Diagnostic::error(text)
            } else {
                Diagnostic::warning(text)
            });
            continue;
        }

        let Some(current) = messages.last_mut() else {
            continue;
        };
        if current.location.is_some() {
            continue;
        }
        if let Some(caps) = MESSAGE_LOCATION.captures(line) {
            let (Ok(line_no), Ok(column)) = (caps[2].parse::<u32>(), caps[3].parse::<u32>()) else {
                continue;
            };
            *current = current.clone().at(&caps[1], line_no, column);
        }
    }

    messages.into_iter().partition(Diagnostic::is_error)
}
