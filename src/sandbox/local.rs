//! Direct host execution with a restricted environment.
//!
//! Used when no container is available. Isolation is limited to a minimal
//! `PATH`, `HOME` pinned to the workspace and a kill-on-timeout process
//! group; the validator remains the only boundary.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::runtime::ExecOutput;

const RESTRICTED_PATH: &str = "/usr/bin:/bin:/usr/local/bin";
const RESTRICTED_USER: &str = "safeuser";

#[derive(Debug)]
pub enum LocalOutcome {
    Finished(ExecOutput),
    TimedOut,
}

/// Run `command` through `bash -c` in `workspace`.
///
/// On timeout the whole process group is killed so pipelines and
/// background children do not outlive the call.
pub async fn run_restricted(
    command: &str,
    workspace: &Path,
    timeout: Duration,
) -> std::io::Result<LocalOutcome> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workspace)
        .env_clear()
        .env("PATH", RESTRICTED_PATH)
        .env("HOME", workspace)
        .env("USER", RESTRICTED_USER)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn()?;
    let pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(LocalOutcome::Finished(ExecOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }))
        }
        Err(_) => {
            kill_group(pid);
            Ok(LocalOutcome::TimedOut)
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            tracing::debug!("killpg({}) failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
