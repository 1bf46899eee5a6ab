//! Keypad bridge - serial macro keypad to host media controls
//!
//! Reads key and rotary events from the device and turns them into
//! transport, mute and volume actions on the host.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use keypad_bridge::action::ActionSink;
use keypad_bridge::cancel::{self, Canceller};
use keypad_bridge::config::AppConfig;
use keypad_bridge::error::BridgeError;
use keypad_bridge::link::SerialConnector;
use keypad_bridge::monitor;
use keypad_bridge::session::SessionContext;
use keypad_bridge::sinks::{ConsoleSink, ShellSink};
use keypad_bridge::supervisor::Supervisor;

/// Keypad Bridge - control host media playback from a serial macro keypad
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML, or a JSON profile)
    #[arg(short, long, env = "KEYPAD_BRIDGE_CONFIG", default_value = "keypad-bridge.yaml")]
    config: PathBuf,

    /// Serial device path, overrides `device.path`
    #[arg(short, long, env = "KEYPAD_BRIDGE_DEVICE")]
    device: Option<String>,

    /// Baud rate, overrides `device.baud`
    #[arg(short, long)]
    baud: Option<u32>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Directory for error_log.txt
    #[arg(long, env = "KEYPAD_BRIDGE_LOG_DIR", default_value = ".")]
    log_dir: PathBuf,

    /// Log actions instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Print decoded events without dispatching anything
    #[arg(long)]
    monitor: bool,

    /// List available serial ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Keep the guard alive so the error log is flushed on exit
    let _log_guard = init_logging(&args.log_level, args.log_json, &args.log_dir)?;

    if args.list_ports {
        monitor::list_ports_formatted();
        return Ok(ExitCode::SUCCESS);
    }

    info!("Starting Keypad Bridge v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config.display());

    let mut config = load_config(&args.config).await?;
    if let Some(baud) = args.baud {
        config.device.baud = baud;
        config.validate()?;
    }

    let device = config.device_target(args.device.as_deref())?;
    let table = config.shared_command_table()?;
    let connector = Arc::new(SerialConnector::new(config.device_settle()));
    info!(
        "Device {} @ {} baud, {} command binding(s)",
        device.path,
        device.baud,
        table.len()
    );

    let (canceller, shutdown) = cancel::channel();
    tokio::spawn(shutdown_signal(canceller));

    if args.monitor {
        monitor::run_monitor(connector.as_ref(), &device, &table, shutdown).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let sink: Arc<dyn ActionSink> = if args.dry_run {
        info!("Dry run: actions are logged, not executed");
        Arc::new(ConsoleSink::default())
    } else {
        Arc::new(ShellSink::new(config.actions.clone()))
    };
    info!("Action sink: {}", sink.name());

    let supervisor = Supervisor::new(
        connector,
        device,
        SessionContext {
            table,
            sink,
            config: config.session_config(),
        },
        config.reconnect_policy(),
    );

    match supervisor.run(shutdown).await {
        Ok(()) => {
            info!("Keypad Bridge shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ BridgeError::RetryExhausted { .. }) => {
            error!("{}", e);
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(e.into()),
    }
}

/// Load the config file, falling back to defaults when the default path is absent
async fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() && path == Path::new("keypad-bridge.yaml") {
        info!("No configuration file found, using defaults");
        return Ok(AppConfig::default());
    }

    AppConfig::load(path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn init_logging(level: &str, json: bool, log_dir: &Path) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let (error_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, "error_log.txt"));

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    let error_file = tracing_subscriber::fmt::layer()
        .with_writer(error_writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(error_file)
        .init();

    Ok(guard)
}

/// Cancel the bridge on Ctrl+C
async fn shutdown_signal(canceller: Canceller) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        // Dropping the canceller would stop the bridge
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    canceller.cancel();

    // A second Ctrl+C skips the graceful teardown
    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(130);
    }
}
