//! The long-lived sandbox container and its lifecycle.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::layout::{KnownFolder, SANDBOX_HOME};

use super::error::SandboxError;
use super::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, ExecRequest};

/// How long to wait for a fresh container to report running.
#[derive(Debug, Clone, Copy)]
pub struct StartupPolicy {
    pub retries: u32,
    pub interval: Duration,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            interval: Duration::from_millis(500),
        }
    }
}

/// An owned handle to the running sandbox container.
///
/// Created by [`open`](Self::open), released by [`close`](Self::close).
pub struct ContainerSandbox {
    runtime: Arc<dyn ContainerRuntime>,
    spec: ContainerSpec,
    startup: StartupPolicy,
}

impl std::fmt::Debug for ContainerSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSandbox")
            .field("name", &self.spec.name)
            .field("image", &self.spec.image)
            .finish()
    }
}

impl ContainerSandbox {
    /// Bring up a fresh container.
    ///
    /// Any existing container with the same name is removed first so the
    /// mount set always matches `spec`. Returns the sandbox together with
    /// the folders the smoke test could not list.
    pub async fn open(
        runtime: Arc<dyn ContainerRuntime>,
        spec: ContainerSpec,
        startup: StartupPolicy,
    ) -> Result<(Self, Vec<KnownFolder>), SandboxError> {
        runtime.ping().await?;

        if !runtime.image_exists(&spec.image).await? {
            return Err(SandboxError::ImageMissing(spec.image.clone()));
        }

        if runtime.inspect(&spec.name).await?.is_some() {
            info!("Removing stale sandbox container {}", spec.name);
            runtime.remove(&spec.name).await?;
        }

        info!("Creating sandbox container {} from {}", spec.name, spec.image);
        runtime.create(&spec).await?;

        let sandbox = Self {
            runtime,
            spec,
            startup,
        };
        sandbox.wait_until_running().await?;

        let missing = sandbox.smoke_test().await;
        Ok((sandbox, missing))
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    async fn wait_until_running(&self) -> Result<(), SandboxError> {
        for attempt in 1..=self.startup.retries {
            if self.runtime.inspect(&self.spec.name).await? == Some(ContainerState::Running) {
                debug!("Container {} running after {} checks", self.spec.name, attempt);
                return Ok(());
            }
            tokio::time::sleep(self.startup.interval).await;
        }
        Err(SandboxError::NotRunning {
            name: self.spec.name.clone(),
            attempts: self.startup.retries,
        })
    }

    /// List every mounted folder; returns the ones that failed. Never fatal.
    pub async fn smoke_test(&self) -> Vec<KnownFolder> {
        let mut missing = Vec::new();
        for mount in &self.spec.mounts {
            let command = format!("ls {} > /dev/null", mount.sandbox_path.display());
            match self.exec_raw(&command).await {
                Ok(out) if out.exit_code == 0 => {
                    debug!("Mount ok: {}", mount.sandbox_path.display());
                }
                Ok(out) => {
                    warn!(
                        "Mount {} is not listable: {}",
                        mount.sandbox_path.display(),
                        out.stderr.trim()
                    );
                    missing.push(mount.folder);
                }
                Err(e) => {
                    warn!("Mount check for {} failed: {}", mount.sandbox_path.display(), e);
                    missing.push(mount.folder);
                }
            }
        }
        missing
    }

    /// Restart the container if it stopped, recreate it if it vanished.
    pub async fn ensure_running(&self) -> Result<(), SandboxError> {
        match self.runtime.inspect(&self.spec.name).await? {
            Some(ContainerState::Running) => return Ok(()),
            Some(ContainerState::Stopped) => {
                info!("Restarting stopped sandbox container {}", self.spec.name);
                self.runtime.start(&self.spec.name).await?;
            }
            None => {
                warn!("Sandbox container {} disappeared; recreating", self.spec.name);
                self.runtime.create(&self.spec).await?;
            }
        }
        self.wait_until_running().await
    }

    /// Run `command` through bash in the sandbox home.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput, SandboxError> {
        self.ensure_running().await?;
        self.exec_raw(command).await
    }

    async fn exec_raw(&self, command: &str) -> Result<ExecOutput, SandboxError> {
        let request = ExecRequest {
            command: command.to_string(),
            working_dir: SANDBOX_HOME.to_string(),
            env: vec![("HOME".to_string(), SANDBOX_HOME.to_string())],
        };
        self.runtime.exec(&self.spec.name, &request).await
    }

    /// Stop and remove the container. Failures are logged, not returned.
    pub async fn close(&self) {
        if let Err(e) = self.runtime.stop(&self.spec.name).await {
            warn!("Failed to stop sandbox container {}: {}", self.spec.name, e);
        }
        match self.runtime.remove(&self.spec.name).await {
            Ok(()) => info!("Removed sandbox container {}", self.spec.name),
            Err(e) => warn!("Failed to remove sandbox container {}: {}", self.spec.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MountAccess;
    use crate::sandbox::mounts::FolderMapping;
    use crate::sandbox::runtime::MockContainerRuntime;
    use mockall::Sequence;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "nlfs-test".into(),
            image: "ubuntu:22.04".into(),
            memory_limit: "512m".into(),
            cpu_quota: 50_000,
            network: "none".into(),
            working_dir: SANDBOX_HOME.into(),
            mounts: vec![
                FolderMapping {
                    folder: KnownFolder::Desktop,
                    sandbox_path: PathBuf::from("/home/user/Desktop"),
                    host_path: PathBuf::from("/h/Desktop"),
                    access: MountAccess::ReadOnly,
                    available: true,
                },
                FolderMapping {
                    folder: KnownFolder::Workspace,
                    sandbox_path: PathBuf::from("/home/user/workspace"),
                    host_path: PathBuf::from("/h/ws"),
                    access: MountAccess::ReadWrite,
                    available: true,
                },
            ],
        }
    }

    fn fast() -> StartupPolicy {
        StartupPolicy {
            retries: 3,
            interval: Duration::from_millis(1),
        }
    }

    fn ok(stdout: &str) -> ExecOutput {
        ExecOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[tokio::test]
    async fn open_tears_down_stale_container_first() {
        let mut rt = MockContainerRuntime::new();
        let mut seq = Sequence::new();

        rt.expect_ping().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        rt.expect_image_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));
        rt.expect_inspect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(ContainerState::Stopped)));
        rt.expect_remove()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        rt.expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        rt.expect_inspect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(ContainerState::Running)));
        rt.expect_exec().times(2).returning(|_, _| Ok(ok("")));

        let (sandbox, missing) = ContainerSandbox::open(Arc::new(rt), spec(), fast())
            .await
            .unwrap();
        assert_eq!(sandbox.name(), "nlfs-test");
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn open_fails_when_image_missing() {
        let mut rt = MockContainerRuntime::new();
        rt.expect_ping().returning(|| Ok(()));
        rt.expect_image_exists().returning(|_| Ok(false));
        rt.expect_create().never();

        let err = ContainerSandbox::open(Arc::new(rt), spec(), fast())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ImageMissing(image) if image == "ubuntu:22.04"));
    }

    #[tokio::test]
    async fn open_fails_when_runtime_unreachable() {
        let mut rt = MockContainerRuntime::new();
        rt.expect_ping().returning(|| {
            Err(SandboxError::RuntimeUnavailable {
                runtime: "docker".into(),
                reason: "Cannot connect to the Docker daemon".into(),
            })
        });
        rt.expect_image_exists().never();

        let err = ContainerSandbox::open(Arc::new(rt), spec(), fast())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::RuntimeUnavailable { .. }));
    }

    #[tokio::test]
    async fn open_gives_up_after_retry_window() {
        let mut rt = MockContainerRuntime::new();
        rt.expect_ping().returning(|| Ok(()));
        rt.expect_image_exists().returning(|_| Ok(true));
        let mut first = true;
        rt.expect_inspect().returning(move |_| {
            if std::mem::take(&mut first) {
                Ok(None)
            } else {
                Ok(Some(ContainerState::Stopped))
            }
        });
        rt.expect_create().returning(|_| Ok(()));

        let err = ContainerSandbox::open(Arc::new(rt), spec(), fast())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotRunning { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn smoke_test_reports_unlistable_mounts() {
        let mut rt = MockContainerRuntime::new();
        rt.expect_ping().returning(|| Ok(()));
        rt.expect_image_exists().returning(|_| Ok(true));
        let mut created = false;
        rt.expect_inspect().returning(move |_| {
            let state = created.then_some(ContainerState::Running);
            created = true;
            Ok(state)
        });
        rt.expect_create().returning(|_| Ok(()));
        rt.expect_exec().returning(|_, req| {
            if req.command.contains("Desktop") {
                Ok(ExecOutput {
                    exit_code: 2,
                    stdout: String::new(),
                    stderr: "ls: cannot access".into(),
                })
            } else {
                Ok(ok(""))
            }
        });

        let (_, missing) = ContainerSandbox::open(Arc::new(rt), spec(), fast())
            .await
            .unwrap();
        assert_eq!(missing, vec![KnownFolder::Desktop]);
    }

    #[tokio::test]
    async fn exec_restarts_stopped_container() {
        let mut rt = MockContainerRuntime::new();
        let mut seq = Sequence::new();
        rt.expect_inspect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(ContainerState::Stopped)));
        rt.expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        rt.expect_inspect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(ContainerState::Running)));
        rt.expect_exec()
            .withf(|name, req| {
                name.contains("nlfs-test") && req.command == "ls" && req.working_dir == SANDBOX_HOME
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ok("Desktop\nworkspace\n")));

        let sandbox = ContainerSandbox {
            runtime: Arc::new(rt),
            spec: spec(),
            startup: fast(),
        };
        let out = sandbox.exec("ls").await.unwrap();
        assert_eq!(out.stdout, "Desktop\nworkspace\n");
    }

    #[tokio::test]
    async fn close_swallows_failures() {
        let mut rt = MockContainerRuntime::new();
        rt.expect_stop()
            .returning(|_| Err(SandboxError::Runtime("no such container".into())));
        rt.expect_remove()
            .times(1)
            .returning(|_| Err(SandboxError::Runtime("no such container".into())));

        let sandbox = ContainerSandbox {
            runtime: Arc::new(rt),
            spec: spec(),
            startup: fast(),
        };
        sandbox.close().await;
    }
}
