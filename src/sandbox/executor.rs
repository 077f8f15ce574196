use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{SandboxConfig, SandboxMode};
use crate::layout::{SANDBOX_HOME, SandboxLayout};
use crate::safety::PathNormalizer;

use super::container::{ContainerSandbox, StartupPolicy};
use super::error::SandboxError;
use super::local::{LocalOutcome, run_restricted};
use super::mounts::MountTable;
use super::runtime::{ContainerRuntime, ContainerSpec, DockerCli, ExecOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Which backend actually ran a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMethod {
    Sandboxed,
    Local,
}

/// Outcome of one `execute` call. Failures of any kind are reported here,
/// never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub execution_method: ExecutionMethod,
    #[serde(default)]
    pub timed_out: bool,
}

impl ExecutionResult {
    fn from_output(command: &str, method: ExecutionMethod, output: ExecOutput) -> Self {
        let status = if output.exit_code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        };
        Self {
            status,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            command: command.to_string(),
            timestamp: Utc::now(),
            execution_method: method,
            timed_out: false,
        }
    }

    fn failure(command: &str, method: ExecutionMethod, message: String) -> Self {
        Self {
            status: ExecutionStatus::Error,
            exit_code: -1,
            stdout: String::new(),
            stderr: message,
            command: command.to_string(),
            timestamp: Utc::now(),
            execution_method: method,
            timed_out: false,
        }
    }

    fn timeout(command: &str, method: ExecutionMethod, after: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::failure(
                command,
                method,
                format!("Command timed out after {}", describe_duration(after)),
            )
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

fn describe_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{} seconds", d.as_secs())
    } else {
        format!("{} ms", d.as_millis())
    }
}

/// Lifecycle position of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Mounts are known; no backend has been chosen yet.
    MountsProbed,
    /// Commands run in the container.
    SandboxReady,
    /// Local mode was configured.
    LocalReady,
    /// The container could not be started; commands run locally.
    LocalFallbackReady,
}

enum Backend {
    Container(ContainerSandbox),
    Local { degraded: bool },
}

/// Runs validated commands, in the container when possible.
///
/// Not internally serialized: callers that need one command at a time must
/// arrange it themselves (the CLI holds one executor per process under the
/// session lock).
pub struct SandboxExecutor {
    settings: SandboxConfig,
    layout: SandboxLayout,
    normalizer: PathNormalizer,
    mounts: RwLock<MountTable>,
    runtime: Arc<dyn ContainerRuntime>,
    backend: OnceCell<Backend>,
}

impl SandboxExecutor {
    /// Probe mounts and create the workspace. The backend starts lazily on
    /// the first `execute`.
    pub fn new(
        settings: &SandboxConfig,
        layout: SandboxLayout,
        workspace: &Path,
    ) -> Result<Self, SandboxError> {
        let mounts = MountTable::discover(&layout, workspace, &settings.mounts)?;
        let runtime = Arc::new(DockerCli::new(settings.runtime.clone()));
        Ok(Self::with_runtime(settings.clone(), layout, mounts, runtime))
    }

    /// Like [`new`](Self::new), then start the backend immediately.
    ///
    /// Fails if the container cannot be started and `fallback_to_local` is
    /// off.
    pub async fn open(
        settings: &SandboxConfig,
        layout: SandboxLayout,
        workspace: &Path,
    ) -> Result<Self, SandboxError> {
        let executor = Self::new(settings, layout, workspace)?;
        executor.ready().await?;
        Ok(executor)
    }

    pub fn with_runtime(
        settings: SandboxConfig,
        layout: SandboxLayout,
        mounts: MountTable,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let normalizer = PathNormalizer::new(&layout);
        Self {
            settings,
            layout,
            normalizer,
            mounts: RwLock::new(mounts),
            runtime,
            backend: OnceCell::new(),
        }
    }

    pub fn state(&self) -> ExecutorState {
        match self.backend.get() {
            None => ExecutorState::MountsProbed,
            Some(Backend::Container(_)) => ExecutorState::SandboxReady,
            Some(Backend::Local { degraded: false }) => ExecutorState::LocalReady,
            Some(Backend::Local { degraded: true }) => ExecutorState::LocalFallbackReady,
        }
    }

    /// Snapshot of the mount table, including availability flags.
    pub fn mounts(&self) -> MountTable {
        self.read_mounts().clone()
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.exec_timeout_secs)
    }

    fn read_mounts(&self) -> std::sync::RwLockReadGuard<'_, MountTable> {
        self.mounts.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the backend if it is not running yet.
    pub async fn ready(&self) -> Result<ExecutorState, SandboxError> {
        self.backend.get_or_try_init(|| self.initialize()).await?;
        Ok(self.state())
    }

    async fn initialize(&self) -> Result<Backend, SandboxError> {
        if self.settings.mode == SandboxMode::Local {
            info!("Sandbox mode is local; commands run on the host");
            return Ok(Backend::Local { degraded: false });
        }

        let spec = self.container_spec();
        let startup = StartupPolicy {
            retries: self.settings.startup_retries.max(1),
            interval: Duration::from_millis(self.settings.startup_retry_interval_ms),
        };

        match ContainerSandbox::open(self.runtime.clone(), spec, startup).await {
            Ok((sandbox, missing)) => {
                if !missing.is_empty() {
                    let mut mounts = self.mounts.write().unwrap_or_else(|e| e.into_inner());
                    for folder in missing {
                        mounts.mark_unavailable(folder);
                    }
                }
                Ok(Backend::Container(sandbox))
            }
            Err(e) if self.settings.fallback_to_local => {
                warn!("Container sandbox unavailable ({}); falling back to local execution", e);
                Ok(Backend::Local { degraded: true })
            }
            Err(e) => Err(e),
        }
    }

    fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.settings.container_name.clone(),
            image: self.settings.image.clone(),
            memory_limit: self.settings.memory_limit.clone(),
            cpu_quota: self.settings.cpu_quota,
            network: self.settings.network.clone(),
            working_dir: SANDBOX_HOME.to_string(),
            mounts: self.read_mounts().mappings().to_vec(),
        }
    }

    /// Run `command` and report what happened. `None` uses the configured
    /// timeout.
    pub async fn execute(&self, command: &str, timeout: Option<Duration>) -> ExecutionResult {
        let command = self.normalizer.normalize(command);
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());

        let backend = match self.backend.get_or_try_init(|| self.initialize()).await {
            Ok(backend) => backend,
            Err(e) => {
                return ExecutionResult::failure(
                    &command,
                    ExecutionMethod::Sandboxed,
                    format!("Sandbox unavailable: {e}"),
                );
            }
        };

        match backend {
            Backend::Container(sandbox) => self.execute_container(sandbox, &command, timeout).await,
            Backend::Local { .. } => self.execute_local(&command, timeout).await,
        }
    }

    async fn execute_container(
        &self,
        sandbox: &ContainerSandbox,
        command: &str,
        timeout: Duration,
    ) -> ExecutionResult {
        debug!("Executing in sandbox: {}", command);
        match tokio::time::timeout(timeout, sandbox.exec(command)).await {
            Ok(Ok(output)) => ExecutionResult::from_output(command, ExecutionMethod::Sandboxed, output),
            Ok(Err(e)) => ExecutionResult::failure(
                command,
                ExecutionMethod::Sandboxed,
                format!("Sandbox execution error: {e}"),
            ),
            Err(_) => {
                warn!("Sandboxed command exceeded {:?}: {}", timeout, command);
                ExecutionResult::timeout(command, ExecutionMethod::Sandboxed, timeout)
            }
        }
    }

    async fn execute_local(&self, command: &str, timeout: Duration) -> ExecutionResult {
        let (host_command, workspace) = {
            let mounts = self.read_mounts();
            (mounts.to_host_command(command), mounts.workspace().to_path_buf())
        };
        debug!("Executing locally: {}", host_command);

        match run_restricted(&host_command, &workspace, timeout).await {
            Ok(LocalOutcome::Finished(output)) => {
                ExecutionResult::from_output(command, ExecutionMethod::Local, output)
            }
            Ok(LocalOutcome::TimedOut) => {
                warn!("Local command exceeded {:?}: {}", timeout, command);
                ExecutionResult::timeout(command, ExecutionMethod::Local, timeout)
            }
            Err(e) => ExecutionResult::failure(command, ExecutionMethod::Local, e.to_string()),
        }
    }

    /// Long listing of every available mounted folder.
    pub async fn get_workspace_contents(&self) -> String {
        let folders: Vec<String> = self
            .read_mounts()
            .mappings()
            .iter()
            .filter(|m| m.available)
            .map(|m| m.sandbox_path.display().to_string())
            .collect();

        let mut out = String::new();
        for folder in folders {
            let result = self.execute(&format!("ls -la {folder}"), None).await;
            out.push_str(&format!("== {folder} ==\n"));
            if result.is_success() {
                out.push_str(&result.stdout);
            } else {
                out.push_str(&format!("(unavailable: {})\n", result.stderr.trim()));
            }
        }
        out
    }

    /// Stop and remove the container, if one was started. Never fails.
    pub async fn cleanup(&self) {
        if let Some(Backend::Container(sandbox)) = self.backend.get() {
            sandbox.close().await;
        }
    }
}
