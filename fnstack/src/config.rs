//! Configuration management

use fnstack_core::Project;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            node: NodeConfig::default(),
            server: ServerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Defaults to `<root>/.fnstack/platform`
    #[serde(default)]
    pub platform_dir: Option<PathBuf>,

    /// Defaults to `<root>/.fnstack/artifacts`
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            platform_dir: None,
            out_dir: None,
        }
    }
}

impl ProjectConfig {
    /// Project layout with relative directories resolved against the root
    pub fn project(&self) -> std::io::Result<Project> {
        let root = absolute(&self.root)?;
        let mut project = Project::new(&root);
        if let Some(dir) = &self.platform_dir {
            project = project.with_platform_dir(root.join(dir));
        }
        if let Some(dir) = &self.out_dir {
            project = project.with_artifacts_dir(root.join(dir));
        }
        Ok(project)
    }
}

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node")]
    pub binary: PathBuf,

    #[serde(default = "default_esbuild")]
    pub esbuild: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            binary: default_node(),
            esbuild: default_esbuild(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Control-plane endpoint handed to workers
    #[serde(default = "default_runtime_api")]
    pub runtime_api: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            runtime_api: default_runtime_api(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_node() -> PathBuf {
    PathBuf::from("node")
}

fn default_esbuild() -> PathBuf {
    PathBuf::from("esbuild")
}

fn default_runtime_api() -> String {
    "127.0.0.1:4566".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

impl Config {
    /// Load configuration from `fnstack.toml` (or `file`) and `FNSTACK_*`
    /// environment variables
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("fnstack").required(false),
        };

        // Nested keys use a double underscore: FNSTACK_PROJECT__ROOT
        let env = config::Environment::with_prefix("FNSTACK")
            .prefix_separator("_")
            .separator("__");

        let config = config::Config::builder()
            .add_source(source)
            .add_source(env)
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }
}
