//! Node.js runtime for fnstack
//!
//! Bundles function handlers incrementally, tracks the files each build
//! depends on, and runs built handlers in supervised worker processes.

pub mod builder;
pub mod bundler;
pub mod deps;
pub mod fs;
pub mod handler;
pub mod loader;
pub mod options;
pub mod properties;
pub mod runtime;
pub mod worker;

pub use builder::{BuildResult, Builder};
pub use bundler::{BuildContext, BundleResult, Bundler, EsbuildCli};
pub use loader::Loader;
pub use options::BuildOptions;
pub use properties::{Format, NodeProperties};
pub use runtime::NodeRuntime;
pub use worker::{HostCommand, LogStream, NodeWorker, WorkerManager};
