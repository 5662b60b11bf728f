//! mqbridge - MQTT v5 broker to cloud queue and topic bridge
//!
//! Usage:
//!   mqbridge [OPTIONS] [COMMAND]
//!
//! Commands:
//!   run            Relay until something fails (default)
//!   handle-event   Forward one topic event read from stdin
//!
//! Options:
//!   -c, --config <FILE>    Bootstrap configuration file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mqbridge::bridge;
use mqbridge::config::{Config, DeploymentShape};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Relay until something fails
    #[default]
    Run,
    /// Forward one topic event document read from stdin
    HandleEvent,
}

/// mqbridge - MQTT broker to cloud queue and topic bridge
#[derive(Parser, Debug)]
#[command(name = "mqbridge")]
#[command(version)]
#[command(about = "Bridge between an MQTT v5 broker and cloud queues and topics")]
struct Args {
    /// Bootstrap configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let command = args.command.unwrap_or_default();
    let shape = match command {
        Command::Run => DeploymentShape::Worker,
        Command::HandleEvent => DeploymentShape::EventHandler,
    };

    let settings = match bridge::load_settings(&config, shape).await {
        Ok(settings) => settings,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting mqbridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Variant: {}", settings.variant);
    info!("  Broker: {}", settings.broker.endpoint);
    info!("  Client id: {}", settings.broker.client_id);

    let result = match command {
        Command::Run => bridge::run(&settings).await,
        Command::HandleEvent => {
            let mut event = String::new();
            std::io::stdin().read_to_string(&mut event)?;
            bridge::handle_event(&settings, &event)
                .await
                .map(|forwarded| info!("Forwarded {} topic event records", forwarded))
        }
    };

    if let Err(e) = result {
        error!("Bridge {} stopped: {}", settings.variant, e);
        std::process::exit(1);
    }

    Ok(())
}
