//! Fixed filesystem contract shared by the validator and the executor.
//!
//! Inside the sandbox the user's home is always `/home/user`:
//!
//! | Path                   | Access     | Host source                     |
//! |------------------------|------------|---------------------------------|
//! | `/home/user/Desktop`   | read-only  | host Desktop (if present)       |
//! | `/home/user/Documents` | read-only  | host Documents (if present)     |
//! | `/home/user/Downloads` | read-only  | host Downloads (if present)     |
//! | `/home/user/workspace` | read-write | data dir `workspace/` (created) |
//!
//! Every helper here is lexical: nothing touches the real filesystem, so the
//! same answers hold on the host and inside the container.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Home directory inside the sandbox. Commands run with this as cwd.
pub const SANDBOX_HOME: &str = "/home/user";

/// Maximum `..` segments a single command may contain.
pub const DEFAULT_MAX_TRAVERSAL_DEPTH: usize = 3;

/// Whether a mounted folder may be written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountAccess {
    ReadOnly,
    ReadWrite,
}

/// One of the well-known folders under the sandbox home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownFolder {
    Desktop,
    Documents,
    Downloads,
    Workspace,
}

impl KnownFolder {
    pub const ALL: [KnownFolder; 4] = [
        KnownFolder::Desktop,
        KnownFolder::Documents,
        KnownFolder::Downloads,
        KnownFolder::Workspace,
    ];

    /// Canonical capitalization as it appears under the sandbox home.
    pub fn canonical_name(self) -> &'static str {
        match self {
            KnownFolder::Desktop => "Desktop",
            KnownFolder::Documents => "Documents",
            KnownFolder::Downloads => "Downloads",
            KnownFolder::Workspace => "workspace",
        }
    }

    pub fn access(self) -> MountAccess {
        match self {
            KnownFolder::Workspace => MountAccess::ReadWrite,
            _ => MountAccess::ReadOnly,
        }
    }

    /// Case-insensitive lookup (`DOCUMENTS`, `documents`, `Documents`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.canonical_name().eq_ignore_ascii_case(name))
    }
}

/// Resolved description of the sandbox filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxLayout {
    /// Sandbox home; relative paths resolve against it.
    pub home: PathBuf,

    /// Roots a write target may resolve into.
    pub safe_roots: Vec<PathBuf>,

    /// Folders no command may write into.
    pub read_only_mounts: Vec<PathBuf>,

    /// System roots no token may reference at all.
    pub forbidden_roots: Vec<PathBuf>,

    /// Raw block-device prefixes (string prefixes, `/dev/sda1` matches `/dev/sd`).
    pub block_device_prefixes: Vec<String>,

    /// Upper bound on `..` segments per command.
    pub max_traversal_depth: usize,
}

impl Default for SandboxLayout {
    fn default() -> Self {
        let home = PathBuf::from(SANDBOX_HOME);
        let read_only_mounts = KnownFolder::ALL
            .into_iter()
            .filter(|f| f.access() == MountAccess::ReadOnly)
            .map(|f| home.join(f.canonical_name()))
            .collect();

        Self {
            safe_roots: vec![home.clone(), PathBuf::from("/tmp")],
            read_only_mounts,
            forbidden_roots: ["/etc", "/root", "/sys", "/proc", "/boot"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            block_device_prefixes: ["/dev/sd", "/dev/hd", "/dev/nvme", "/dev/xvd", "/dev/mmcblk"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_traversal_depth: DEFAULT_MAX_TRAVERSAL_DEPTH,
            home,
        }
    }
}

impl SandboxLayout {
    pub fn with_max_traversal_depth(mut self, depth: usize) -> Self {
        self.max_traversal_depth = depth;
        self
    }

    /// Sandbox path of a known folder, e.g. `/home/user/Documents`.
    pub fn folder_path(&self, folder: KnownFolder) -> PathBuf {
        self.home.join(folder.canonical_name())
    }

    /// Resolve `path` as the shell would from the sandbox home, lexically.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.resolve_from(&self.home, path)
    }

    /// Resolve `path` as the shell would from `cwd`, lexically.
    pub fn resolve_from(&self, cwd: &Path, path: &str) -> PathBuf {
        let raw = Path::new(path);
        if raw.is_absolute() {
            lexical_normalize(raw)
        } else {
            lexical_normalize(&cwd.join(raw))
        }
    }

    /// The read-only mount `path` falls under, if any.
    pub fn read_only_mount_for(&self, path: &str) -> Option<&Path> {
        self.read_only_mount_containing(&self.resolve(path))
    }

    pub fn is_in_sandbox(&self, path: &str) -> bool {
        self.within_safe_roots(&self.resolve(path))
    }

    /// The read-only mount an already resolved path falls under.
    pub fn read_only_mount_containing(&self, resolved: &Path) -> Option<&Path> {
        self.read_only_mounts
            .iter()
            .find(|m| resolved.starts_with(m))
            .map(PathBuf::as_path)
    }

    /// A read-only mount at or below `resolved`, reached by anything that
    /// recurses from it (`rm -r ~`, `find ~ -delete`).
    pub fn read_only_mount_below(&self, resolved: &Path) -> Option<&Path> {
        self.read_only_mounts
            .iter()
            .find(|m| m.starts_with(resolved))
            .map(PathBuf::as_path)
    }

    /// A read-only mount that a wildcard in `resolved` could expand into.
    ///
    /// Only the first component holding `*`, `?`, `[` or `{` is matched;
    /// whatever that component selects, the literal prefix before it must
    /// not reach a mount through it.
    pub fn read_only_mount_matching(&self, resolved: &Path) -> Option<&Path> {
        let mut prefix = PathBuf::new();
        let mut pattern = None;
        for component in resolved.components() {
            let text = component.as_os_str().to_string_lossy();
            if text.contains(['*', '?', '[', '{']) {
                pattern = Some(text.into_owned());
                break;
            }
            prefix.push(component.as_os_str());
        }
        let pattern = pattern?;

        self.read_only_mounts
            .iter()
            .find(|mount| {
                mount
                    .strip_prefix(&prefix)
                    .ok()
                    .and_then(|rest| rest.components().next())
                    .is_some_and(|next| {
                        wildcard_matches(&pattern, &next.as_os_str().to_string_lossy())
                    })
            })
            .map(PathBuf::as_path)
    }

    pub fn within_safe_roots(&self, resolved: &Path) -> bool {
        self.safe_roots.iter().any(|r| resolved.starts_with(r))
    }

    /// The forbidden system location `path` references, if any.
    ///
    /// Only absolute paths are considered; a relative `etc/passwd` is a file
    /// in the sandbox home.
    pub fn forbidden_root_for(&self, path: &str) -> Option<String> {
        if !path.starts_with('/') {
            return None;
        }

        for prefix in &self.block_device_prefixes {
            if path.starts_with(prefix.as_str()) {
                return Some(prefix.clone());
            }
        }

        let resolved = lexical_normalize(Path::new(path));
        self.forbidden_roots
            .iter()
            .find(|r| resolved.starts_with(r))
            .map(|r| r.display().to_string())
    }
}

/// Whether a shell wildcard component could expand to `name`. Brace
/// expansion is treated as matching anything.
fn wildcard_matches(pattern: &str, name: &str) -> bool {
    if pattern.contains('{') {
        return true;
    }

    let mut expr = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '[' => {
                expr.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    expr.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if c == '\\' || c == '[' {
                        expr.push('\\');
                    }
                    expr.push(c);
                }
                expr.push(']');
            }
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');

    // An expression we cannot compile is assumed to match.
    Regex::new(&expr).map_or(true, |re| re.is_match(name))
}

/// Collapse `.` and `..` without consulting the filesystem.
///
/// `..` above the root is dropped, matching how the kernel treats `/..`.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        if path.is_absolute() {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        }
    } else {
        out
    }
}
