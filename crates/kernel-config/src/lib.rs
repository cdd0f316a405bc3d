use kernel_protocol::defaults::{
    DEFAULT_CHANNEL_BIND_TIMEOUT_SECS, DEFAULT_PLACEMENT_DIR, DEFAULT_PLACEMENT_TIMEOUT_SECS,
    DEFAULT_RESPAWN_ATTEMPTS, DEFAULT_RESPAWN_BACKOFF_MS, DEFAULT_WORKER_BINARY,
    DEFAULT_WORKER_READY_TIMEOUT_SECS,
};
use kernel_protocol::OrphanPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_KERNEL_SUPERVISOR_CONFIG: &str = "KERNEL_SUPERVISOR_CONFIG";

const APP_DIR: &str = "kernel-supervisor";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "kernel-supervisor.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KernelConfig {
    #[serde(default)]
    pub worker: WorkerConfigToml,
    #[serde(default)]
    pub startup: StartupConfigToml,
    #[serde(default)]
    pub recovery: RecoveryConfigToml,
    #[serde(default)]
    pub logging: LoggingConfigToml,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerConfigToml {
    #[serde(default = "default_worker_binary")]
    pub binary: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Passed to every worker launch as-is, in order.
    #[serde(default)]
    pub init_scripts: Vec<String>,
    #[serde(default)]
    pub compiler_args: Vec<String>,
    #[serde(default = "default_placement_root")]
    pub placement_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupConfigToml {
    #[serde(default = "default_placement_timeout_secs")]
    pub placement_timeout_secs: u64,
    #[serde(default = "default_channel_bind_timeout_secs")]
    pub channel_bind_timeout_secs: u64,
    #[serde(default = "default_worker_ready_timeout_secs")]
    pub worker_ready_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryConfigToml {
    #[serde(default = "default_respawn_attempts")]
    pub respawn_attempts: u32,
    #[serde(default = "default_respawn_backoff_ms")]
    pub respawn_backoff_ms: u64,
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfigToml {
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupTimeouts {
    pub placement: Duration,
    pub channel_bind: Duration,
    pub worker_ready: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub respawn_attempts: u32,
    pub respawn_backoff: Duration,
    pub orphan_policy: OrphanPolicy,
}

impl KernelConfig {
    pub fn startup_timeouts(&self) -> StartupTimeouts {
        StartupTimeouts {
            placement: Duration::from_secs(self.startup.placement_timeout_secs),
            channel_bind: Duration::from_secs(self.startup.channel_bind_timeout_secs),
            worker_ready: Duration::from_secs(self.startup.worker_ready_timeout_secs),
        }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            respawn_attempts: self.recovery.respawn_attempts,
            respawn_backoff: Duration::from_millis(self.recovery.respawn_backoff_ms),
            orphan_policy: self.recovery.orphan_policy,
        }
    }
}

impl Default for WorkerConfigToml {
    fn default() -> Self {
        Self {
            binary: default_worker_binary(),
            args: Vec::new(),
            init_scripts: Vec::new(),
            compiler_args: Vec::new(),
            placement_root: default_placement_root(),
        }
    }
}

impl Default for StartupConfigToml {
    fn default() -> Self {
        Self {
            placement_timeout_secs: default_placement_timeout_secs(),
            channel_bind_timeout_secs: default_channel_bind_timeout_secs(),
            worker_ready_timeout_secs: default_worker_ready_timeout_secs(),
        }
    }
}

impl Default for RecoveryConfigToml {
    fn default() -> Self {
        Self {
            respawn_attempts: default_respawn_attempts(),
            respawn_backoff_ms: default_respawn_backoff_ms(),
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

impl Default for LoggingConfigToml {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            filter: default_log_filter(),
        }
    }
}

pub fn load_from_env() -> Result<KernelConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<KernelConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join(APP_DIR).join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_KERNEL_SUPERVISOR_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "KERNEL_SUPERVISOR_CONFIG contained invalid UTF-8",
        )),
    }
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

fn resolve_state_dir() -> PathBuf {
    if let Ok(path) = std::env::var("XDG_STATE_HOME") {
        let path = path.trim();
        if !path.is_empty() {
            return PathBuf::from(path).join(APP_DIR);
        }
    }
    if let Some(home) = resolve_home_dir() {
        return home.join(".local").join("state").join(APP_DIR);
    }
    std::env::temp_dir().join(APP_DIR)
}

fn default_worker_binary() -> String {
    DEFAULT_WORKER_BINARY.to_owned()
}

fn default_placement_root() -> String {
    std::env::temp_dir()
        .join(DEFAULT_PLACEMENT_DIR)
        .to_string_lossy()
        .to_string()
}

fn default_placement_timeout_secs() -> u64 {
    DEFAULT_PLACEMENT_TIMEOUT_SECS
}

fn default_channel_bind_timeout_secs() -> u64 {
    DEFAULT_CHANNEL_BIND_TIMEOUT_SECS
}

fn default_worker_ready_timeout_secs() -> u64 {
    DEFAULT_WORKER_READY_TIMEOUT_SECS
}

fn default_respawn_attempts() -> u32 {
    DEFAULT_RESPAWN_ATTEMPTS
}

fn default_respawn_backoff_ms() -> u64 {
    DEFAULT_RESPAWN_BACKOFF_MS
}

fn default_log_path() -> String {
    resolve_state_dir()
        .join(DEFAULT_LOG_FILE)
        .to_string_lossy()
        .to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

fn persist_config(path: &Path, config: &KernelConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize KERNEL_SUPERVISOR_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write KERNEL_SUPERVISOR_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<KernelConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for \
                             KERNEL_SUPERVISOR_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = KernelConfig::default();
            persist_config(path, &default_config)?;
            return Ok(default_config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read KERNEL_SUPERVISOR_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: KernelConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse KERNEL_SUPERVISOR_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    let changed = normalize_config(&mut config);
    if changed {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut KernelConfig) -> bool {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut config.worker.binary, default_worker_binary());
    changed |= normalize_non_empty_string(
        &mut config.worker.placement_root,
        default_placement_root(),
    );

    changed |= normalize_positive(
        &mut config.startup.placement_timeout_secs,
        DEFAULT_PLACEMENT_TIMEOUT_SECS,
    );
    changed |= normalize_positive(
        &mut config.startup.channel_bind_timeout_secs,
        DEFAULT_CHANNEL_BIND_TIMEOUT_SECS,
    );
    changed |= normalize_positive(
        &mut config.startup.worker_ready_timeout_secs,
        DEFAULT_WORKER_READY_TIMEOUT_SECS,
    );
    if config.recovery.respawn_attempts == 0 {
        config.recovery.respawn_attempts = DEFAULT_RESPAWN_ATTEMPTS;
        changed = true;
    }

    changed |= normalize_non_empty_string(&mut config.logging.log_path, default_log_path());
    changed |= normalize_non_empty_string(&mut config.logging.filter, default_log_filter());

    changed
}

fn normalize_positive(value: &mut u64, default: u64) -> bool {
    if *value == 0 {
        *value = default;
        return true;
    }
    false
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}
