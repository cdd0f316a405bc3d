use anyhow::Result;
use kernel_app::{launcher_config, serve, supervisor_config, BridgeExit};
use kernel_config::KernelConfig;
use kernel_process::ProcessLauncher;
use kernel_protocol::KernelError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli_flags()?;
    let config = load_config(cli.config.as_deref())?;
    init_file_logging(&config)?;

    let supervisor = supervisor_config(&config);
    let launcher = Arc::new(ProcessLauncher::new(launcher_config(&config)));
    tracing::info!(
        binary = %launcher.config().binary.display(),
        orphan_policy = ?supervisor.orphan_policy,
        "starting kernel supervisor"
    );

    let exit = serve(
        launcher,
        supervisor,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
    )
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "kernel supervisor failed");
        error
    })?;
    if exit == BridgeExit::SupervisorStopped {
        tracing::warn!("kernel supervisor stopped before the client closed its input");
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<KernelConfig> {
    let config = match path {
        Some(path) => kernel_config::load_from_path(path)?,
        None => kernel_config::load_from_env()?,
    };
    Ok(config)
}

fn init_file_logging(config: &KernelConfig) -> Result<(), KernelError> {
    let log_path = PathBuf::from(config.logging.log_path.as_str());
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                KernelError::Configuration(format!(
                    "failed to create kernel supervisor log directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|error| {
            KernelError::Configuration(format!(
                "failed to open kernel supervisor log file '{}': {error}",
                log_path.display()
            ))
        })?;

    let fallback = config.logging.filter.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}

#[derive(Debug, Default)]
struct CliFlags {
    config: Option<PathBuf>,
}

fn parse_cli_flags() -> Result<CliFlags, KernelError> {
    parse_cli_args(std::env::args().skip(1))
}

fn parse_cli_args(args: impl IntoIterator<Item = String>) -> Result<CliFlags, KernelError> {
    let mut flags = CliFlags::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().ok_or_else(|| {
                    KernelError::Configuration(
                        "Missing value after --config. Use --config <path>.".to_owned(),
                    )
                })?;
                let value = value.trim();
                if value.is_empty() {
                    return Err(KernelError::Configuration(
                        "Flag '--config' requires a non-empty value.".to_owned(),
                    ));
                }
                flags.config = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                print_cli_help();
                std::process::exit(0);
            }
            value if value.starts_with("--") => {
                return Err(KernelError::Configuration(format!(
                    "Unknown flag '{value}'. Run with --help for valid flags."
                )));
            }
            unknown => {
                return Err(KernelError::Configuration(format!(
                    "Unexpected argument '{unknown}'. Run with --help for valid flags."
                )));
            }
        }
    }

    Ok(flags)
}

fn print_cli_help() {
    println!("Usage: kernel-supervisor [--config <path>]");
    println!();
    println!("  --config <path>   Read configuration from <path> instead of the default location");
    println!("  --help            Show this help message");
    println!();
    println!("Client messages are read from stdin and protocol traffic is written to stdout,");
    println!("one JSON object per line.");
}
