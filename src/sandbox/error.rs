use std::path::PathBuf;
use thiserror::Error;

/// Failures acquiring the isolated environment.
///
/// These are raised from construction (`SandboxExecutor::open`,
/// `ContainerSandbox::open`). Once an executor exists, failures are reported
/// as error results instead.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("container runtime '{runtime}' is not reachable: {reason}")]
    RuntimeUnavailable { runtime: String, reason: String },

    #[error("sandbox image '{0}' not found; pull or build it first")]
    ImageMissing(String),

    #[error("container '{name}' did not reach the running state after {attempts} attempts")]
    NotRunning { name: String, attempts: u32 },

    #[error("failed to create workspace directory {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("container runtime command failed: {0}")]
    Runtime(String),
}
