//! Handler resolution
//!
//! A handler spec names a module and its export, `functions/api.handler`.
//! The module is found on disk by probing the supported source extensions.

use fnstack_core::RuntimeError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source extensions, in probe order
pub const NODE_EXTENSIONS: [&str; 8] = [".ts", ".tsx", ".mts", ".cts", ".js", ".jsx", ".mjs", ".cjs"];

/// Split a handler spec into its directory and module basename.
///
/// The final `.`-separated segment of the file name is the export and is
/// dropped; earlier dots belong to the basename (`api.v2.handler` -> `api.v2`).
/// Returns `None` when there is no export segment or the basename is empty.
pub fn module_path(handler: &str) -> Option<(PathBuf, String)> {
    let path = Path::new(handler);
    let file_name = path.file_name()?.to_str()?;

    let (base, _export) = file_name.rsplit_once('.')?;
    if base.is_empty() {
        return None;
    }

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Some((dir, base.to_string()))
}

/// Find the source file behind `handler` under `root`.
///
/// Every failure, malformed specs included, is `HandlerNotFound`.
pub fn resolve_handler(root: &Path, handler: &str) -> Result<PathBuf, RuntimeError> {
    let not_found = || RuntimeError::HandlerNotFound(handler.to_string());
    let (dir, base) = module_path(handler).ok_or_else(not_found)?;

    for ext in NODE_EXTENSIONS {
        let candidate = root.join(&dir).join(format!("{base}{ext}"));
        if candidate.is_file() {
            debug!(handler = %handler, file = %candidate.display(), "Resolved handler");
            return Ok(candidate);
        }
    }

    Err(not_found())
}
