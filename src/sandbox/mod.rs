//! Sandboxed execution of validated commands.
//!
//! The preferred backend is a long-lived container (driven through the
//! `docker` CLI) with the host's Desktop, Documents and Downloads mounted
//! read-only and a workspace mounted read-write. When the container cannot
//! be started the executor can degrade to local execution with a restricted
//! environment; every result records which backend ran it.

mod container;
mod error;
mod executor;
mod local;
mod mounts;
mod runtime;

pub use container::{ContainerSandbox, StartupPolicy};
pub use error::SandboxError;
pub use executor::{
    ExecutionMethod, ExecutionResult, ExecutionStatus, ExecutorState, SandboxExecutor,
};
pub use local::{LocalOutcome, run_restricted};
pub use mounts::{FolderMapping, MountTable};
pub use runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, DockerCli, ExecOutput, ExecRequest,
};
