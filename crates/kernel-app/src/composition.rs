use std::path::PathBuf;

use kernel_config::KernelConfig;
use kernel_lifecycle::WorkerLifecycleConfig;
use kernel_process::ProcessLauncherConfig;
use kernel_protocol::WorkerSpawnSpec;
use kernel_supervisor::SupervisorConfig;

pub fn supervisor_config(config: &KernelConfig) -> SupervisorConfig {
    let timeouts = config.startup_timeouts();
    let recovery = config.recovery_policy();

    SupervisorConfig {
        lifecycle: WorkerLifecycleConfig {
            spawn_spec: WorkerSpawnSpec {
                init_scripts: config.worker.init_scripts.clone(),
                compiler_args: config.worker.compiler_args.clone(),
            },
            placement_timeout: timeouts.placement,
        },
        channel_bind_timeout: timeouts.channel_bind,
        respawn_attempts: recovery.respawn_attempts,
        respawn_backoff: recovery.respawn_backoff,
        orphan_policy: recovery.orphan_policy,
    }
}

pub fn launcher_config(config: &KernelConfig) -> ProcessLauncherConfig {
    ProcessLauncherConfig {
        binary: PathBuf::from(config.worker.binary.as_str()),
        base_args: config.worker.args.clone(),
        placement_root: PathBuf::from(config.worker.placement_root.as_str()),
        ready_timeout: config.startup_timeouts().worker_ready,
    }
}
