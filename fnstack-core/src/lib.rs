//! Core types and traits for fnstack
//!
//! This crate provides the vocabulary shared by every runtime: function
//! identity, project layout, build/run requests and the runtime traits.

pub mod error;
pub mod function;
pub mod runtime;

pub use error::RuntimeError;
pub use function::{FunctionId, Project};
pub use runtime::{
    BuildInput, BuildOutput, Diagnostic, Location, LogReader, RunInput, Runtime, Severity, Worker,
};
