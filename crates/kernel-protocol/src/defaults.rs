//! Defaults shared by the library configs and the TOML config file.

use std::time::Duration;

pub const DEFAULT_WORKER_BINARY: &str = "kernel-worker";
/// Directory under the system temp dir that holds worker placements.
pub const DEFAULT_PLACEMENT_DIR: &str = "kernel-supervisor";

pub const DEFAULT_PLACEMENT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CHANNEL_BIND_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_WORKER_READY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RESPAWN_ATTEMPTS: u32 = 3;
pub const DEFAULT_RESPAWN_BACKOFF_MS: u64 = 500;

pub const DEFAULT_PLACEMENT_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_PLACEMENT_TIMEOUT_SECS);
pub const DEFAULT_CHANNEL_BIND_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_CHANNEL_BIND_TIMEOUT_SECS);
pub const DEFAULT_WORKER_READY_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_WORKER_READY_TIMEOUT_SECS);
pub const DEFAULT_RESPAWN_BACKOFF: Duration = Duration::from_millis(DEFAULT_RESPAWN_BACKOFF_MS);
