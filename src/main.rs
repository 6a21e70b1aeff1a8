//! Broker Link - Main Entry Point
//!
//! Runs the connection controller against the configured ThingsBoard brokers
//! until SIGINT or SIGTERM.

use broker_link::config::LinkConfig;
use broker_link::controller::{ConnectionController, ConnectionStats};
use broker_link::device::{ProcessRestart, SystemClock};
use broker_link::driver;
use broker_link::gateway::{rpc_subscriptions, GatewayPublisher};
use broker_link::link::{AlwaysUp, InterfaceLink, LinkProvider};
use broker_link::observability::init_default_logging;
use broker_link::transport::mqtt::MqttTransport;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Resilient telemetry broker connection for IoT gateways
#[derive(Parser)]
#[command(name = "broker-link")]
#[command(about = "Keeps a gateway connected to a ThingsBoard MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "BROKER_LINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and keep the broker session alive
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting broker-link v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_link(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(LinkConfig::load_from_file(path)?);
    }

    let default_paths = ["broker-link.toml", "config/broker-link.toml", "/etc/broker-link.toml"];
    for path_str in default_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(LinkConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create broker-link.toml".into())
}

fn link_provider(config: &LinkConfig) -> Arc<dyn LinkProvider + Sync> {
    match &config.link.interface {
        Some(interface) => {
            info!(interface = %interface, "Watching network interface");
            Arc::new(InterfaceLink::new(interface.clone()))
        }
        None => Arc::new(AlwaysUp),
    }
}

async fn run_link(config: LinkConfig) -> Result<(), Box<dyn std::error::Error>> {
    let servers = config.servers()?;
    let settings = config.controller_settings()?;
    info!(
        device = %config.device.name,
        servers = ?servers.addresses(),
        "Broker link configured"
    );

    let stats = Arc::new(ConnectionStats::new());
    let link = link_provider(&config);
    let transport = MqttTransport::new(config.mqtt_settings());
    let controller = ConnectionController::new(
        settings,
        servers.clone(),
        transport,
        link.clone(),
        Arc::new(SystemClock),
        ProcessRestart::new(config.escalation.restart_exit_code),
    )
    .with_stats(stats.clone());

    let flags = controller.dirty_flags();
    let publisher = GatewayPublisher::new(
        &config.device.name,
        &servers,
        config.telemetry_interval(),
        stats.clone(),
        link,
        flags.clone(),
    );
    let rpc = rpc_subscriptions(stats, flags, publisher.event_queue());
    let mut controller = controller.with_publisher(publisher).with_subscriptions(rpc);

    // Set up signal handling for graceful shutdown
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        let _ = shutdown_tx.send(true);
    });

    let steps = driver::run(&mut controller, config.tick_interval(), shutdown_rx).await;

    let snapshot = controller.stats();
    info!(
        steps,
        attempts = snapshot.attempts,
        retries = snapshot.retries,
        "Broker link stopped"
    );
    Ok(())
}

fn handle_config_command(config: LinkConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    // Surface token problems here rather than on the first connect
    config.resolve_token()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&redacted(config))?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn redacted(mut config: LinkConfig) -> LinkConfig {
    if config.broker.token.is_some() {
        config.broker.token = Some("***".to_string());
    }
    config
}
