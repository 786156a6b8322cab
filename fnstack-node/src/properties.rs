//! Node function properties
//!
//! Properties arrive as loosely-typed JSON. Each recognised field is read on
//! its own: a missing or wrong-typed field keeps its default, unknown fields
//! are ignored, and an unreadable document yields all defaults. Parsing never
//! fails a build.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Output module format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Esm,
    Cjs,
}

impl Format {
    /// `"cjs"` selects CommonJS; anything else is ESM
    pub fn from_tag(tag: &str) -> Self {
        if tag == "cjs" {
            Self::Cjs
        } else {
            Self::Esm
        }
    }

    /// Extension of the bundled output
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Esm => "mjs",
            Self::Cjs => "cjs",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Esm => "esm",
            Self::Cjs => "cjs",
        }
    }
}

/// Low-level bundler options from the `esbuild` passthrough block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EsbuildOverrides {
    pub target: Option<Vec<String>>,
    pub define: BTreeMap<String, String>,
    pub main_fields: Option<Vec<String>>,
    pub conditions: Option<Vec<String>>,
    pub external: Vec<String>,
    pub keep_names: Option<bool>,
    pub sources_content: Option<bool>,
}

impl EsbuildOverrides {
    fn from_map(map: &Map<String, Value>) -> Self {
        for key in map.keys() {
            if !Self::KNOWN.iter().any(|known| key.eq_ignore_ascii_case(known)) {
                debug!(option = %key, "Ignoring unsupported esbuild option");
            }
        }

        let target = match lookup(map, "target") {
            Some(Value::String(target)) if !target.is_empty() => Some(vec![target.clone()]),
            Some(Value::Array(_)) => string_list(map, "target").filter(|t| !t.is_empty()),
            _ => None,
        };

        Self {
            target,
            define: string_map(map, "define"),
            main_fields: string_list(map, "mainFields"),
            conditions: string_list(map, "conditions"),
            external: string_list(map, "external").unwrap_or_default(),
            keep_names: field(map, "keepNames"),
            sources_content: field(map, "sourcesContent"),
        }
    }

    const KNOWN: [&'static str; 7] = [
        "target",
        "define",
        "mainFields",
        "conditions",
        "external",
        "keepNames",
        "sourcesContent",
    ];
}

/// Build properties of a Node function
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProperties {
    /// File extension -> loader tag
    pub loader: BTreeMap<String, String>,
    /// Packages left out of the bundle and resolved at run time
    pub install: Vec<String>,
    pub banner: String,
    pub esbuild: EsbuildOverrides,
    pub minify: bool,
    pub format: Format,
    /// Linked source maps unless explicitly `false`, which emits none.
    /// The worker host runs with `--enable-source-maps`, so turning this
    /// off loses mapped stack traces.
    pub source_map: bool,
    pub splitting: bool,
    /// Module exporting bundler plugins, relative to the project root
    pub plugins: Option<String>,
}

impl Default for NodeProperties {
    fn default() -> Self {
        Self {
            loader: BTreeMap::new(),
            install: Vec::new(),
            banner: String::new(),
            esbuild: EsbuildOverrides::default(),
            minify: false,
            format: Format::Esm,
            source_map: true,
            splitting: false,
            plugins: None,
        }
    }
}

impl NodeProperties {
    /// Read properties from a JSON value
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(map) = value else {
            if !value.is_null() {
                debug!("Function properties are not an object, using defaults");
            }
            return Self::default();
        };

        let defaults = Self::default();
        Self {
            loader: string_map(map, "loader"),
            install: string_list(map, "install").unwrap_or_default(),
            banner: field(map, "banner").unwrap_or_default(),
            esbuild: match lookup(map, "esbuild") {
                Some(Value::Object(block)) => EsbuildOverrides::from_map(block),
                _ => EsbuildOverrides::default(),
            },
            minify: field(map, "minify").unwrap_or(defaults.minify),
            format: field::<String>(map, "format")
                .map(|tag| Format::from_tag(&tag))
                .unwrap_or_default(),
            source_map: field(map, "sourceMap").unwrap_or(defaults.source_map),
            splitting: field(map, "splitting").unwrap_or(defaults.splitting),
            plugins: field::<String>(map, "plugins").filter(|p| !p.is_empty()),
        }
    }

    /// Read properties from raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                debug!(error = %e, "Unreadable function properties, using defaults");
                Self::default()
            }
        }
    }
}

/// Case-insensitive key lookup; an exact match wins
fn lookup<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    let value = lookup(map, key)?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(field = %key, error = %e, "Ignoring malformed property");
            None
        }
    }
}

/// String entries of a list; non-string entries are dropped
fn string_list(map: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    match lookup(map, key)? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

/// String entries of an object; non-string values are dropped
fn string_map(map: &Map<String, Value>, key: &str) -> BTreeMap<String, String> {
    match lookup(map, key) {
        Some(Value::Object(entries)) => entries
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    }
}
