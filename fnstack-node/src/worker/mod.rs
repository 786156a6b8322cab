//! Worker processes
//!
//! Every run request gets its own host process, started as the leader of a
//! new process group so termination reaches anything the worker spawns.

pub mod logs;
pub mod terminate;

use async_trait::async_trait;
use fnstack_core::{LogReader, RunInput, RuntimeError, Worker};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use logs::{multiplex, LogStream};
pub use terminate::terminate_process_tree;

/// Developer tooling variables copied from this process into workers
pub const PASSTHROUGH_ENV: [&str; 2] = ["NODE_OPTIONS", "VSCODE_INSPECTOR_OPTIONS"];

/// Variable carrying the control-plane endpoint
pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

/// Entry script inside the platform directory
pub const NODE_ENTRY: &str = "dist/nodejs-runtime/index.js";

/// Host interpreter invocation preceding the artifact and worker arguments
#[derive(Debug, Clone)]
pub struct HostCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl HostCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `node --enable-source-maps <platform_dir>/dist/nodejs-runtime/index.js`
    pub fn node(node: impl Into<PathBuf>, platform_dir: &Path) -> Self {
        Self::new(node)
            .arg("--enable-source-maps")
            .arg(platform_dir.join(NODE_ENTRY))
    }
}

/// Spawns worker processes
#[derive(Debug, Clone)]
pub struct WorkerManager {
    host: HostCommand,
}

impl WorkerManager {
    pub fn new(host: HostCommand) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &HostCommand {
        &self.host
    }

    /// Prepared command for `input`
    pub fn command(&self, input: &RunInput) -> Command {
        let mut command = Command::new(&self.host.program);
        command
            .args(&self.host.args)
            .arg(&input.artifact)
            .arg(&input.worker_id)
            .current_dir(&input.work_dir)
            .env_clear()
            .envs(&input.env);

        for name in PASSTHROUGH_ENV {
            if let Some(value) = std::env::var_os(name) {
                command.env(name, value);
            }
        }
        command.env(RUNTIME_API_ENV, &input.server);

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        command.process_group(0);
        #[cfg(windows)]
        command.creation_flags(0x0000_0200); // CREATE_NEW_PROCESS_GROUP

        command
    }

    /// Start a worker. Returns as soon as the process is running.
    pub fn spawn(&self, input: RunInput) -> Result<NodeWorker, RuntimeError> {
        let mut child = self.command(&input).spawn().map_err(|e| {
            RuntimeError::Spawn(format!("{}: {e}", self.host.program.display()))
        })?;

        let pid = child.id();
        let pipes = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => Some((stdout, stderr)),
            _ => None,
        };

        info!(
            worker_id = %input.worker_id,
            pid = ?pid,
            program = %self.host.program.display(),
            artifact = %input.artifact.display(),
            env = ?input.env.keys().collect::<Vec<_>>(),
            "Started worker"
        );

        let exited = CancellationToken::new();
        tokio::spawn(supervise(
            child,
            pid,
            input.worker_id.clone(),
            input.cancel.clone(),
            exited.clone(),
        ));

        Ok(NodeWorker {
            worker_id: input.worker_id,
            pid,
            pipes: Mutex::new(pipes),
            exited,
        })
    }
}

/// Reap the child, or terminate its tree when the run is cancelled first
async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    worker_id: String,
    cancel: CancellationToken,
    exited: CancellationToken,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => info!(worker_id = %worker_id, status = %status, "Worker exited"),
            Err(e) => warn!(worker_id = %worker_id, error = %e, "Failed to wait for worker"),
        },
        () = cancel.cancelled() => {
            debug!(worker_id = %worker_id, "Run cancelled, terminating worker");
            match pid {
                Some(pid) => terminate_process_tree(pid),
                None => {
                    let _ = child.start_kill();
                }
            }
            let _ = child.wait().await;
        }
    }
    exited.cancel();
}

/// A running worker process
pub struct NodeWorker {
    worker_id: String,
    pid: Option<u32>,
    pipes: Mutex<Option<(ChildStdout, ChildStderr)>>,
    exited: CancellationToken,
}

impl NodeWorker {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Merged output. The pipes can be taken once; later calls get an
    /// empty stream.
    pub fn log_stream(&self) -> LogStream {
        match self.pipes.lock().take() {
            Some((stdout, stderr)) => multiplex(stdout, stderr),
            None => {
                warn!(worker_id = %self.worker_id, "Worker logs already taken");
                LogStream::closed()
            }
        }
    }
}

#[async_trait]
impl Worker for NodeWorker {
    /// Signals the worker's group while the worker is running. Once the
    /// worker has been reaped its pid may be reused, so nothing is signalled
    /// and processes left behind in its group are not reached.
    fn stop(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        if self.has_exited() {
            debug!(worker_id = %self.worker_id, pid, "Worker already exited");
            return;
        }
        debug!(worker_id = %self.worker_id, pid, "Stopping worker");
        terminate_process_tree(pid);
    }

    fn logs(&self) -> LogReader {
        Box::new(self.log_stream())
    }

    async fn wait(&self) {
        self.exited.cancelled().await;
    }
}
