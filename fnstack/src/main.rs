//! fnstack - local runtime for Node.js function handlers
//!
//! Builds a single function with the incremental bundler and optionally runs
//! it in a worker process, streaming the worker's output to the terminal.

mod config;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use fnstack_core::{BuildInput, BuildOutput, FunctionId, RunInput, Runtime, Worker};
use fnstack_node::{EsbuildCli, HostCommand, NodeRuntime};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "fnstack")]
#[command(about = "Local runtime for Node.js function handlers", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./fnstack.toml when present)
    #[arg(short, long, env = "FNSTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Project root
    #[arg(long, env = "FNSTACK_ROOT")]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FNSTACK_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a function once and report its diagnostics
    Build(FunctionArgs),

    /// Build a function and run it in a worker until it exits or Ctrl-C
    Run {
        #[command(flatten)]
        function: FunctionArgs,

        /// Extra worker environment, as KEY=VALUE
        #[arg(short, long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Worker id (random when omitted)
        #[arg(long)]
        worker_id: Option<String>,
    },

    /// Build a function and list the files its bundle depends on
    Deps(FunctionArgs),
}

#[derive(ClapArgs, Debug)]
struct FunctionArgs {
    /// Function identity
    function_id: String,

    /// Handler spec, e.g. `handlers/orders.post`
    handler: String,

    /// Build properties as a JSON document
    #[arg(long, conflicts_with = "properties_file")]
    properties: Option<String>,

    /// File holding the build properties
    #[arg(long)]
    properties_file: Option<PathBuf>,
}

impl FunctionArgs {
    fn build_input(&self) -> anyhow::Result<BuildInput> {
        let raw = match (&self.properties, &self.properties_file) {
            (Some(json), _) => json.clone().into_bytes(),
            (None, Some(path)) => std::fs::read(path)
                .with_context(|| format!("reading {}", path.display()))?,
            (None, None) => return Ok(BuildInput::new(self.function_id.as_str(), &self.handler)),
        };

        // Unparseable properties build with defaults
        let properties = serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unparseable build properties");
            serde_json::Value::Null
        });

        Ok(BuildInput::new(self.function_id.as_str(), &self.handler).with_properties(properties))
    }
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(root) = args.root {
        config.project.root = root;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fnstack={0},fnstack_node={0},fnstack_core={0}", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let project = config.project.project()?;
    info!(root = %project.root.display(), "Starting fnstack");

    let host = HostCommand::node(&config.node.binary, &project.platform_dir);
    let bundler = Arc::new(EsbuildCli::new(&config.node.esbuild));
    let runtime = NodeRuntime::with_parts(project, bundler, host);

    let result = match args.command {
        Command::Build(function) => build(&runtime, &function).await.map(|_| ()),
        Command::Deps(function) => deps(&runtime, &function).await,
        Command::Run {
            function,
            env,
            worker_id,
        } => run(&runtime, &config, &function, env, worker_id).await,
    };

    runtime.dispose_all().await;
    result
}

async fn build(runtime: &NodeRuntime, function: &FunctionArgs) -> anyhow::Result<BuildOutput> {
    let input = function.build_input()?;
    let output = runtime.build(&input).await?;

    for message in output.messages() {
        eprintln!("{message}");
    }
    if output.has_errors() {
        anyhow::bail!("build of {} failed", output.function_id);
    }

    println!("{}", output.artifact.display());
    Ok(output)
}

async fn deps(runtime: &NodeRuntime, function: &FunctionArgs) -> anyhow::Result<()> {
    let input = function.build_input()?;
    let output = runtime.build(&input).await?;
    if output.has_errors() {
        for message in output.messages() {
            eprintln!("{message}");
        }
    }

    let id = FunctionId::from(function.function_id.as_str());
    match runtime.dependencies(&id) {
        Some(files) => {
            for file in files {
                println!("{}", file.display());
            }
            Ok(())
        }
        None => anyhow::bail!("no dependency report for {id}"),
    }
}

async fn run(
    runtime: &NodeRuntime,
    config: &Config,
    function: &FunctionArgs,
    env: Vec<(String, String)>,
    worker_id: Option<String>,
) -> anyhow::Result<()> {
    let output = build(runtime, function).await?;

    // Workers start from an empty environment
    let mut worker_env = BTreeMap::new();
    if let Ok(path) = std::env::var("PATH") {
        worker_env.insert("PATH".to_string(), path);
    }
    worker_env.extend(env);

    let cancel = CancellationToken::new();
    let worker_id = worker_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let input = RunInput::for_build(&output, worker_id, &config.server.runtime_api)
        .with_env(worker_env)
        .with_cancel(cancel.clone());

    let worker = runtime.run(input).await?;
    let mut logs = worker.logs();

    let copy = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let copied = tokio::io::copy(&mut logs, &mut stdout).await;
        let _ = stdout.flush().await;
        copied
    });

    tokio::select! {
        () = worker.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping worker");
            cancel.cancel();
            worker.wait().await;
        }
    }

    match copy.await {
        Ok(Ok(bytes)) => info!(bytes, "Worker finished"),
        Ok(Err(e)) => error!(error = %e, "Failed to forward worker output"),
        Err(e) => error!(error = %e, "Log forwarding task failed"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("STAGE=dev").unwrap(),
            ("STAGE".to_string(), "dev".to_string())
        );
        assert_eq!(
            parse_env("URL=a=b").unwrap(),
            ("URL".to_string(), "a=b".to_string())
        );
        assert!(parse_env("STAGE").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let args = Args::try_parse_from([
            "fnstack",
            "--root",
            "/app",
            "run",
            "fnA",
            "handlers/a.post",
            "-e",
            "STAGE=dev",
            "--properties",
            r#"{"format":"cjs"}"#,
        ])
        .unwrap();

        assert_eq!(args.root, Some(PathBuf::from("/app")));
        match args.command {
            Command::Run { function, env, .. } => {
                assert_eq!(function.function_id, "fnA");
                assert_eq!(env, vec![("STAGE".to_string(), "dev".to_string())]);
                let input = function.build_input().unwrap();
                assert_eq!(input.properties["format"], "cjs");
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_properties_build_with_defaults() {
        let function = FunctionArgs {
            function_id: "fnA".to_string(),
            handler: "handlers/a.post".to_string(),
            properties: Some("{not json".to_string()),
            properties_file: None,
        };

        let input = function.build_input().unwrap();
        assert!(input.properties.is_null());
    }
}
