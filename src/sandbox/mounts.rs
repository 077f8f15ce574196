//! Host folder discovery and the sandbox <-> host mount table.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::MountOverrides;
use crate::layout::{KnownFolder, MountAccess, SandboxLayout};

use super::error::SandboxError;

/// One bind mount: a canonical sandbox path backed by a host directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderMapping {
    pub folder: KnownFolder,
    pub sandbox_path: PathBuf,
    pub host_path: PathBuf,
    pub access: MountAccess,
    /// Cleared when the post-start smoke test cannot list the folder.
    pub available: bool,
}

impl FolderMapping {
    pub fn to_docker_arg(&self) -> String {
        let ro = match self.access {
            MountAccess::ReadOnly => ",readonly",
            MountAccess::ReadWrite => "",
        };
        format!(
            "--mount=type=bind,source={},target={}{}",
            self.host_path.display(),
            self.sandbox_path.display(),
            ro
        )
    }
}

/// Mounts for one executor, built once at initialization.
#[derive(Debug, Clone, Serialize)]
pub struct MountTable {
    home: PathBuf,
    workspace: PathBuf,
    mappings: Vec<FolderMapping>,
}

impl MountTable {
    /// Create the workspace and look up the platform's user folders.
    pub fn discover(
        layout: &SandboxLayout,
        workspace: &Path,
        overrides: &MountOverrides,
    ) -> Result<Self, SandboxError> {
        let user_dirs = directories::UserDirs::new();
        Self::discover_with(layout, workspace, |folder| {
            let configured = match folder {
                KnownFolder::Desktop => overrides.desktop.as_deref(),
                KnownFolder::Documents => overrides.documents.as_deref(),
                KnownFolder::Downloads => overrides.downloads.as_deref(),
                KnownFolder::Workspace => None,
            };
            if let Some(path) = configured {
                return Some(PathBuf::from(shellexpand::tilde(path).to_string()));
            }
            let dirs = user_dirs.as_ref()?;
            let found = match folder {
                KnownFolder::Desktop => dirs.desktop_dir(),
                KnownFolder::Documents => dirs.document_dir(),
                KnownFolder::Downloads => dirs.download_dir(),
                KnownFolder::Workspace => None,
            };
            found.map(Path::to_path_buf)
        })
    }

    /// Like [`discover`](Self::discover) with an explicit host folder lookup.
    ///
    /// Read-only folders whose host directory does not exist are skipped.
    pub fn discover_with(
        layout: &SandboxLayout,
        workspace: &Path,
        host_folder: impl Fn(KnownFolder) -> Option<PathBuf>,
    ) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(workspace).map_err(|source| SandboxError::Workspace {
            path: workspace.to_path_buf(),
            source,
        })?;

        let mut mappings = Vec::new();
        for folder in KnownFolder::ALL {
            let host_path = match folder.access() {
                MountAccess::ReadWrite => workspace.to_path_buf(),
                MountAccess::ReadOnly => match host_folder(folder) {
                    Some(p) if p.is_dir() => p,
                    Some(p) => {
                        debug!("Skipping {}: {} does not exist", folder.canonical_name(), p.display());
                        continue;
                    }
                    None => {
                        debug!("Skipping {}: no host folder", folder.canonical_name());
                        continue;
                    }
                },
            };

            mappings.push(FolderMapping {
                folder,
                sandbox_path: layout.folder_path(folder),
                host_path,
                access: folder.access(),
                available: true,
            });
        }

        info!(
            "Mount table: {}",
            mappings
                .iter()
                .map(|m| format!("{} -> {}", m.sandbox_path.display(), m.host_path.display()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            home: layout.home.clone(),
            workspace: workspace.to_path_buf(),
            mappings,
        })
    }

    pub fn mappings(&self) -> &[FolderMapping] {
        &self.mappings
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn get(&self, folder: KnownFolder) -> Option<&FolderMapping> {
        self.mappings.iter().find(|m| m.folder == folder)
    }

    pub fn mark_unavailable(&mut self, folder: KnownFolder) {
        if let Some(m) = self.mappings.iter_mut().find(|m| m.folder == folder) {
            m.available = false;
        }
    }

    /// Rewrite sandbox paths in `command` to host paths for local execution.
    ///
    /// Longest prefix wins, so `/home/user/workspace/x` maps through the
    /// workspace entry and not the home entry. A prefix only matches at a
    /// path boundary: `/home/user/Desktopx` is left alone.
    pub fn to_host_command(&self, command: &str) -> String {
        let mut entries: Vec<(String, String)> = self
            .mappings
            .iter()
            .map(|m| {
                (
                    m.sandbox_path.display().to_string(),
                    m.host_path.display().to_string(),
                )
            })
            .collect();
        entries.push((
            self.home.display().to_string(),
            self.workspace.display().to_string(),
        ));
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut out = String::with_capacity(command.len());
        let mut rest = command;
        let mut prev: Option<char> = None;

        'scan: while !rest.is_empty() {
            if prev.is_none_or(|c| !is_path_char(c)) {
                for (sandbox, host) in &entries {
                    if let Some(after) = rest.strip_prefix(sandbox.as_str())
                        && after.chars().next().is_none_or(|c| c == '/' || !is_path_char(c))
                    {
                        out.push_str(host);
                        prev = sandbox.chars().last();
                        rest = after;
                        continue 'scan;
                    }
                }
            }

            let Some(ch) = rest.chars().next() else { break };
            out.push(ch);
            prev = Some(ch);
            rest = &rest[ch.len_utf8()..];
        }

        out
    }
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '~' | '$')
}
