//! Test utilities for fnstack
//!
//! Provides utilities for integration testing the runtimes:
//! - Temporary project trees on disk
//! - A fake bundler that records its configuration and reports the
//!   relative imports it followed as the build's inputs
//! - Shell-based worker hosts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fnstack_test::{FakeBundler, TestProject};
//!
//! #[tokio::test]
//! async fn test_build() {
//!     let project = TestProject::new();
//!     project.write("handlers/a.ts", "export const post = () => 1;");
//!
//!     let bundler = FakeBundler::new();
//!     // hand `project.project()` and `bundler.shared()` to a runtime
//! }
//! ```

pub mod bundler;
pub mod project;

pub use bundler::FakeBundler;
pub use project::TestProject;

use fnstack_node::HostCommand;

/// Worker host running `script` with `/bin/sh`.
///
/// The artifact path and worker id arrive as `$1` and `$2`.
pub fn shell_host(script: &str) -> HostCommand {
    HostCommand::new("/bin/sh").arg("-c").arg(script).arg("worker")
}

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fnstack=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
