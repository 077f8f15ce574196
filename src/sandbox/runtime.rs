//! Container runtime seam.
//!
//! [`ContainerRuntime`] is the small set of lifecycle calls the sandbox
//! needs. [`DockerCli`] implements it by shelling out to the `docker` CLI
//! (or any CLI-compatible runtime such as `podman`).

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::error::SandboxError;
use super::mounts::FolderMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
}

/// Everything needed to create the sandbox container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub memory_limit: String,
    pub cpu_quota: u64,
    pub network: String,
    pub working_dir: String,
    pub mounts: Vec<FolderMapping>,
}

impl ContainerSpec {
    /// Arguments for `docker run`: detached, with a TTY so `/bin/bash` stays
    /// alive as PID 1.
    pub fn to_run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "-t".to_string(),
            format!("--name={}", self.name),
            format!("--memory={}", self.memory_limit),
            format!("--cpu-quota={}", self.cpu_quota),
            "--cpu-period=100000".to_string(),
            format!("--network={}", self.network),
            "--security-opt=no-new-privileges:true".to_string(),
            format!("--workdir={}", self.working_dir),
        ];
        args.extend(self.mounts.iter().map(FolderMapping::to_docker_arg));
        args.push(self.image.clone());
        args.push("/bin/bash".to_string());
        args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub command: String,
    pub working_dir: String,
    pub env: Vec<(String, String)>,
}

/// Output of one exec; stdout and stderr are kept apart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fails with `RuntimeUnavailable` if the daemon cannot be reached.
    async fn ping(&self) -> Result<(), SandboxError>;

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError>;

    /// `None` when no container with this name exists.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, SandboxError>;

    /// Create and start a container.
    async fn create(&self, spec: &ContainerSpec) -> Result<(), SandboxError>;

    async fn start(&self, name: &str) -> Result<(), SandboxError>;

    /// Run `bash -c` inside the container. Dropping the future kills the
    /// client process; the command inside the container may keep running.
    async fn exec(&self, name: &str, request: &ExecRequest) -> Result<ExecOutput, SandboxError>;

    async fn stop(&self, name: &str) -> Result<(), SandboxError>;

    /// Force-remove, stopping first if needed.
    async fn remove(&self, name: &str) -> Result<(), SandboxError>;
}

/// [`ContainerRuntime`] over the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output, SandboxError> {
        debug!("{} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SandboxError::RuntimeUnavailable {
                runtime: self.binary.clone(),
                reason: e.to_string(),
            })
    }

    async fn run_checked(&self, args: &[String]) -> Result<String, SandboxError> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(SandboxError::Runtime(format!(
                "{} {}: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> Result<(), SandboxError> {
        let args = strings(&["info", "--format", "{{.ServerVersion}}"]);
        let ping = self.run(&args);
        let output = tokio::time::timeout(Duration::from_secs(10), ping)
            .await
            .map_err(|_| SandboxError::RuntimeUnavailable {
                runtime: self.binary.clone(),
                reason: "timed out waiting for the daemon".to_string(),
            })??;

        if output.status.success() {
            Ok(())
        } else {
            Err(SandboxError::RuntimeUnavailable {
                runtime: self.binary.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        let output = self.run(&strings(&["image", "inspect", image])).await?;
        Ok(output.status.success())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, SandboxError> {
        let output = self
            .run(&strings(&["inspect", "--format", "{{.State.Running}}", name]))
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let running = String::from_utf8_lossy(&output.stdout).trim() == "true";
        Ok(Some(if running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        }))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), SandboxError> {
        self.run_checked(&spec.to_run_args()).await.map(|_| ())
    }

    async fn start(&self, name: &str) -> Result<(), SandboxError> {
        self.run_checked(&strings(&["start", name])).await.map(|_| ())
    }

    async fn exec(&self, name: &str, request: &ExecRequest) -> Result<ExecOutput, SandboxError> {
        let mut args = vec![
            "exec".to_string(),
            format!("--workdir={}", request.working_dir),
        ];
        for (key, value) in &request.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.extend([
            name.to_string(),
            "bash".to_string(),
            "-c".to_string(),
            request.command.clone(),
        ]);

        let output = self.run(&args).await?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn stop(&self, name: &str) -> Result<(), SandboxError> {
        self.run_checked(&strings(&["stop", "--time", "2", name]))
            .await
            .map(|_| ())
    }

    async fn remove(&self, name: &str) -> Result<(), SandboxError> {
        self.run_checked(&strings(&["rm", "--force", name]))
            .await
            .map(|_| ())
    }
}
