use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::{DEFAULT_MAX_TRAVERSAL_DEPTH, SandboxLayout};
use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub operations: OperationsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// "ollama" | "openai"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_generator_model")]
    pub model: String,

    /// Base URL. Ollama: http://localhost:11434, OpenAI-compatible: .../v1
    #[serde(default = "default_generator_endpoint")]
    pub endpoint: String,

    /// Required for "openai"; supports ${ENV_VAR}
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Run inside a container; see `fallback_to_local`.
    Container,
    /// Run directly on the host with a restricted environment.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_mode")]
    pub mode: SandboxMode,

    /// Degrade to local execution when the container cannot be started.
    #[serde(default = "default_true")]
    pub fallback_to_local: bool,

    /// Container CLI binary
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Passed to `--memory`
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// Passed to `--cpu-quota` (microseconds per 100ms period)
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: u64,

    /// Passed to `--network`
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Polls for the container to reach the running state
    #[serde(default = "default_startup_retries")]
    pub startup_retries: u32,

    #[serde(default = "default_startup_retry_interval")]
    pub startup_retry_interval_ms: u64,

    /// Host workspace override (default: data_dir/workspace)
    #[serde(default)]
    pub workspace: Option<String>,

    #[serde(default)]
    pub mounts: MountOverrides,
}

/// Host folders to mount instead of the platform's user directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountOverrides {
    #[serde(default)]
    pub desktop: Option<String>,

    #[serde(default)]
    pub documents: Option<String>,

    #[serde(default)]
    pub downloads: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_max_traversal_depth")]
    pub max_traversal_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_generator_model() -> String {
    "llama3".to_string()
}
fn default_generator_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_generator_timeout() -> u64 {
    60
}
fn default_sandbox_mode() -> SandboxMode {
    SandboxMode::Container
}
fn default_true() -> bool {
    true
}
fn default_runtime() -> String {
    "docker".to_string()
}
fn default_image() -> String {
    "ubuntu:22.04".to_string()
}
fn default_container_name() -> String {
    "nlfs-sandbox".to_string()
}
fn default_memory_limit() -> String {
    "512m".to_string()
}
fn default_cpu_quota() -> u64 {
    50_000 // half a CPU
}
fn default_network() -> String {
    "none".to_string()
}
fn default_exec_timeout() -> u64 {
    30
}
fn default_startup_retries() -> u32 {
    10
}
fn default_startup_retry_interval() -> u64 {
    500
}
fn default_max_traversal_depth() -> usize {
    DEFAULT_MAX_TRAVERSAL_DEPTH
}
fn default_max_records() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_generator_model(),
            endpoint: default_generator_endpoint(),
            api_key: None,
            timeout_secs: default_generator_timeout(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: default_sandbox_mode(),
            fallback_to_local: default_true(),
            runtime: default_runtime(),
            image: default_image(),
            container_name: default_container_name(),
            memory_limit: default_memory_limit(),
            cpu_quota: default_cpu_quota(),
            network: default_network(),
            exec_timeout_secs: default_exec_timeout(),
            startup_retries: default_startup_retries(),
            startup_retry_interval_ms: default_startup_retry_interval(),
            workspace: None,
            mounts: MountOverrides::default(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: default_max_traversal_depth(),
        }
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_records: default_max_records(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from the default location, writing the commented template on
    /// first run.
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        let path = paths.config_file();

        if !path.exists() {
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        Self::load_from(&path, paths)
    }

    /// Load an explicit config file (the `--config` flag). Missing files are
    /// an error here; no template is written.
    pub fn load_from(path: &Path, paths: Paths) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.paths = paths;
        config.expand_env_vars();

        if let Some(ws) = config.sandbox.workspace.as_deref()
            && std::env::var("NLFS_WORKSPACE").is_err()
        {
            let ws_path = PathBuf::from(shellexpand::tilde(ws).to_string());
            if ws_path.is_absolute() {
                config.paths.workspace = ws_path;
            }
        }

        Ok(config)
    }

    /// Load `path` if given, otherwise the default location.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let paths = Paths::resolve()?;
                paths.ensure_dirs()?;
                Self::load_from(path, paths)
            }
            None => Self::load(),
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&self.paths.config_file())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();
        Self::write_template(&path)?;
        eprintln!("Created default config at {}", path.display());
        Ok(())
    }

    /// Write the commented default config to `path`.
    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    fn expand_env_vars(&mut self) {
        if let Some(ref mut key) = self.generator.api_key {
            *key = expand_env(key);
        }
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();

        match parts.as_slice() {
            ["generator", "provider"] => Ok(self.generator.provider.clone()),
            ["generator", "model"] => Ok(self.generator.model.clone()),
            ["generator", "endpoint"] => Ok(self.generator.endpoint.clone()),
            ["generator", "timeout_secs"] => Ok(self.generator.timeout_secs.to_string()),
            ["sandbox", "mode"] => Ok(match self.sandbox.mode {
                SandboxMode::Container => "container".to_string(),
                SandboxMode::Local => "local".to_string(),
            }),
            ["sandbox", "fallback_to_local"] => Ok(self.sandbox.fallback_to_local.to_string()),
            ["sandbox", "runtime"] => Ok(self.sandbox.runtime.clone()),
            ["sandbox", "image"] => Ok(self.sandbox.image.clone()),
            ["sandbox", "container_name"] => Ok(self.sandbox.container_name.clone()),
            ["sandbox", "memory_limit"] => Ok(self.sandbox.memory_limit.clone()),
            ["sandbox", "cpu_quota"] => Ok(self.sandbox.cpu_quota.to_string()),
            ["sandbox", "network"] => Ok(self.sandbox.network.clone()),
            ["sandbox", "exec_timeout_secs"] => Ok(self.sandbox.exec_timeout_secs.to_string()),
            ["sandbox", "workspace"] => Ok(opt(&self.sandbox.workspace)),
            ["sandbox", "mounts", "desktop"] => Ok(opt(&self.sandbox.mounts.desktop)),
            ["sandbox", "mounts", "documents"] => Ok(opt(&self.sandbox.mounts.documents)),
            ["sandbox", "mounts", "downloads"] => Ok(opt(&self.sandbox.mounts.downloads)),
            ["validator", "max_traversal_depth"] => {
                Ok(self.validator.max_traversal_depth.to_string())
            }
            ["operations", "enabled"] => Ok(self.operations.enabled.to_string()),
            ["operations", "max_records"] => Ok(self.operations.max_records.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        let opt = || (!value.is_empty()).then(|| value.to_string());

        match parts.as_slice() {
            ["generator", "provider"] => self.generator.provider = value.to_string(),
            ["generator", "model"] => self.generator.model = value.to_string(),
            ["generator", "endpoint"] => self.generator.endpoint = value.to_string(),
            ["generator", "timeout_secs"] => self.generator.timeout_secs = value.parse()?,
            ["sandbox", "mode"] => {
                self.sandbox.mode = match value {
                    "container" => SandboxMode::Container,
                    "local" => SandboxMode::Local,
                    other => anyhow::bail!("Invalid sandbox mode: {} (container | local)", other),
                }
            }
            ["sandbox", "fallback_to_local"] => self.sandbox.fallback_to_local = value.parse()?,
            ["sandbox", "runtime"] => self.sandbox.runtime = value.to_string(),
            ["sandbox", "image"] => self.sandbox.image = value.to_string(),
            ["sandbox", "container_name"] => self.sandbox.container_name = value.to_string(),
            ["sandbox", "memory_limit"] => self.sandbox.memory_limit = value.to_string(),
            ["sandbox", "cpu_quota"] => self.sandbox.cpu_quota = value.parse()?,
            ["sandbox", "network"] => self.sandbox.network = value.to_string(),
            ["sandbox", "exec_timeout_secs"] => self.sandbox.exec_timeout_secs = value.parse()?,
            ["sandbox", "workspace"] => self.sandbox.workspace = opt(),
            ["sandbox", "mounts", "desktop"] => self.sandbox.mounts.desktop = opt(),
            ["sandbox", "mounts", "documents"] => self.sandbox.mounts.documents = opt(),
            ["sandbox", "mounts", "downloads"] => self.sandbox.mounts.downloads = opt(),
            ["validator", "max_traversal_depth"] => {
                self.validator.max_traversal_depth = value.parse()?
            }
            ["operations", "enabled"] => self.operations.enabled = value.parse()?,
            ["operations", "max_records"] => self.operations.max_records = value.parse()?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }

    /// Host directory mounted read-write at `/home/user/workspace`.
    pub fn workspace_path(&self) -> PathBuf {
        self.paths.workspace.clone()
    }

    /// Sandbox layout with the configured traversal limit.
    pub fn layout(&self) -> SandboxLayout {
        SandboxLayout::default().with_max_traversal_depth(self.validator.max_traversal_depth)
    }
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# nlfs configuration
# Auto-created on first run. Edit as needed.

[generator]
# "ollama" (local, default) or "openai" (any OpenAI-compatible endpoint)
provider = "ollama"
model = "llama3"
endpoint = "http://localhost:11434"
timeout_secs = 60
# api_key = "${OPENAI_API_KEY}"       # required for provider = "openai"

[sandbox]
mode = "container"                    # container | local
fallback_to_local = true              # run locally if the container cannot start
runtime = "docker"
image = "ubuntu:22.04"
container_name = "nlfs-sandbox"
memory_limit = "512m"
cpu_quota = 50000                     # 50% of one CPU
network = "none"
exec_timeout_secs = 30
# workspace = "~/nlfs-workspace"      # default: data dir /workspace

# Host folders mounted read-only. Default: your platform's Desktop,
# Documents and Downloads. Folders that do not exist are skipped.
# [sandbox.mounts]
# desktop = "~/Desktop"
# documents = "~/Documents"
# downloads = "~/Downloads"

[validator]
max_traversal_depth = 3               # max ".." segments per command

[operations]
enabled = true
max_records = 1000                    # oldest records are evicted first

[logging]
level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        let defaults = Config::default();

        assert_eq!(config.generator.provider, defaults.generator.provider);
        assert_eq!(config.sandbox.mode, SandboxMode::Container);
        assert_eq!(config.sandbox.image, defaults.sandbox.image);
        assert_eq!(config.sandbox.cpu_quota, defaults.sandbox.cpu_quota);
        assert_eq!(config.validator.max_traversal_depth, 3);
        assert_eq!(config.operations.max_records, 1000);
        assert!(config.generator.api_key.is_none());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.sandbox.container_name, "nlfs-sandbox");
        assert!(config.sandbox.fallback_to_local);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sandbox]
            mode = "local"

            [sandbox.mounts]
            documents = "/srv/docs"
            "#,
        )
        .unwrap();
        assert_eq!(config.sandbox.mode, SandboxMode::Local);
        assert_eq!(config.sandbox.mounts.documents.as_deref(), Some("/srv/docs"));
        assert!(config.sandbox.mounts.desktop.is_none());
        assert_eq!(config.sandbox.exec_timeout_secs, 30);
    }

    #[test]
    fn get_and_set_round_trip() {
        let mut config = Config::default();
        config.set_value("sandbox.mode", "local").unwrap();
        config.set_value("operations.max_records", "50").unwrap();
        config.set_value("sandbox.mounts.desktop", "/tmp/desk").unwrap();

        assert_eq!(config.get_value("sandbox.mode").unwrap(), "local");
        assert_eq!(config.get_value("operations.max_records").unwrap(), "50");
        assert_eq!(config.get_value("sandbox.mounts.desktop").unwrap(), "/tmp/desk");

        config.set_value("sandbox.mounts.desktop", "").unwrap();
        assert!(config.sandbox.mounts.desktop.is_none());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let mut config = Config::default();
        assert!(config.get_value("sandbox.nope").is_err());
        assert!(config.set_value("sandbox.mode", "vm").is_err());
        assert!(config.set_value("sandbox.cpu_quota", "lots").is_err());
    }

    #[test]
    fn expand_env_forms() {
        // SAFETY: test-local variable name
        unsafe { std::env::set_var("NLFS_TEST_API_KEY", "sk-test") };
        assert_eq!(expand_env("${NLFS_TEST_API_KEY}"), "sk-test");
        assert_eq!(expand_env("$NLFS_TEST_API_KEY"), "sk-test");
        assert_eq!(expand_env("literal"), "literal");
        assert_eq!(expand_env("${NLFS_TEST_UNSET_VAR}"), "${NLFS_TEST_UNSET_VAR}");
    }

    #[test]
    fn layout_uses_traversal_limit() {
        let mut config = Config::default();
        config.validator.max_traversal_depth = 7;
        assert_eq!(config.layout().max_traversal_depth, 7);
    }

    #[test]
    fn load_from_file_applies_workspace_override() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        let ws = dir.path().join("ws");
        fs::write(
            &file,
            format!("[sandbox]\nworkspace = \"{}\"\n", ws.display()),
        )
        .unwrap();

        let config = Config::load_from(&file, Paths::default()).unwrap();
        if std::env::var("NLFS_WORKSPACE").is_err() {
            assert_eq!(config.workspace_path(), ws);
        }
    }
}
