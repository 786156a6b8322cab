//! Translation of function properties into bundler options

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::loader::Loader;
use crate::properties::{Format, NodeProperties};

/// Native-binding packages that cannot be bundled
pub const NATIVE_EXTERNALS: [&str; 2] = ["sharp", "pg-native"];

/// Rebuilds `require`, `__filename` and `__dirname` inside an ES module
pub const ESM_SHIM: [&str; 5] = [
    "import { createRequire as topLevelCreateRequire } from 'module';",
    "const require = topLevelCreateRequire(import.meta.url);",
    "import { fileURLToPath as topLevelFileUrlToPath, URL as topLevelURL } from \"url\"",
    "const __filename = topLevelFileUrlToPath(import.meta.url)",
    "const __dirname = topLevelFileUrlToPath(new topLevelURL(\".\", import.meta.url))",
];

const DEFAULT_TARGET: &str = "esnext";

/// Source map emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMap {
    None,
    Linked,
}

/// Fully resolved configuration of one bundler context
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub entry_point: PathBuf,
    pub outfile: PathBuf,
    /// Directory the bundler runs in; relative report paths are relative to it
    pub working_dir: PathBuf,
    pub platform: &'static str,
    pub format: Format,
    pub target: Vec<String>,
    pub main_fields: Vec<String>,
    pub conditions: Vec<String>,
    /// JavaScript banner, if any
    pub banner: Option<String>,
    pub external: Vec<String>,
    /// File extension -> loader
    pub loader: BTreeMap<String, Loader>,
    pub define: BTreeMap<String, String>,
    pub plugins: Vec<PathBuf>,
    pub source_map: SourceMap,
    pub sources_content: Option<bool>,
    pub keep_names: bool,
    pub bundle: bool,
    pub splitting: bool,
    pub minify: bool,
    pub metafile: bool,
    pub write: bool,
}

/// Output path of `file`: its project-relative path with the format's
/// extension, relocated under `out_dir`
pub fn output_path(root: &Path, file: &Path, out_dir: &Path, format: Format) -> PathBuf {
    let rel = file.strip_prefix(root).unwrap_or_else(|_| {
        Path::new(file.file_name().unwrap_or(file.as_os_str()))
    });
    out_dir.join(rel.with_extension(format.extension()))
}

/// Banner injected ahead of the bundle
pub fn banner(format: Format, user_banner: &str) -> Option<String> {
    match format {
        Format::Esm => {
            let mut lines: Vec<&str> = ESM_SHIM.to_vec();
            lines.push(user_banner);
            Some(lines.join("\n"))
        }
        Format::Cjs if user_banner.is_empty() => None,
        Format::Cjs => Some(user_banner.to_string()),
    }
}

/// Resolve the bundler configuration for one function
pub fn build_options(
    root: &Path,
    file: &Path,
    out_dir: &Path,
    props: &NodeProperties,
) -> BuildOptions {
    let format = props.format;

    let mut loader = BTreeMap::new();
    for (ext, tag) in &props.loader {
        match Loader::from_tag(tag) {
            Some(mapped) => {
                loader.insert(ext.clone(), mapped);
            }
            None => debug!(extension = %ext, tag = %tag, "Skipping unknown loader"),
        }
    }
    debug!(loader = ?loader, "Resolved loaders");

    let mut external: Vec<String> = NATIVE_EXTERNALS.iter().map(ToString::to_string).collect();
    for name in props.install.iter().chain(&props.esbuild.external) {
        if !external.contains(name) {
            external.push(name.clone());
        }
    }

    let main_fields = props.esbuild.main_fields.clone().unwrap_or_else(|| match format {
        Format::Esm => vec!["module".to_string(), "main".to_string()],
        Format::Cjs => Vec::new(),
    });

    let target = props
        .esbuild
        .target
        .clone()
        .unwrap_or_else(|| vec![DEFAULT_TARGET.to_string()]);

    BuildOptions {
        entry_point: file.to_path_buf(),
        outfile: output_path(root, file, out_dir, format),
        working_dir: root.to_path_buf(),
        platform: "node",
        format,
        target,
        main_fields,
        conditions: props.esbuild.conditions.clone().unwrap_or_default(),
        banner: banner(format, &props.banner),
        external,
        loader,
        define: props.esbuild.define.clone(),
        plugins: props.plugins.iter().map(|p| root.join(p)).collect(),
        source_map: if props.source_map {
            SourceMap::Linked
        } else {
            SourceMap::None
        },
        sources_content: props.esbuild.sources_content,
        keep_names: props.esbuild.keep_names.unwrap_or(true),
        bundle: true,
        splitting: props.splitting,
        minify: props.minify,
        metafile: true,
        write: true,
    }
}
