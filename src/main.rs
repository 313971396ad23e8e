//! agrolink - live field telemetry over MQTT
//!
//! Watches one device's feed, issues pump commands, or prints the effective
//! configuration.

use agrolink::automation::{run_automation, MoistureAutomation};
use agrolink::config::{DashboardConfig, TransportKind};
use agrolink::model::ReadingKind;
use agrolink::publisher::CommandReceipt;
use agrolink::observability::{init_default_logging, HealthServer};
use agrolink::service::LiveDataService;
use agrolink::transport::mqtt::MqttTransport;
use agrolink::transport::simulation::SimulationTransport;
use agrolink::transport::{ConnectionState, Transport};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

/// Live field telemetry and pump control
#[derive(Parser)]
#[command(name = "agrolink")]
#[command(about = "Live sensor feed and pump control for field devices")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a device and stream its events until interrupted
    Watch {
        /// Device identifier
        #[arg(short, long)]
        device: String,
    },
    /// Send a single actuator command
    Command {
        /// Device identifier
        #[arg(short, long)]
        device: String,
        /// Actuator reading kind (pumpStatus or pumpMode)
        #[arg(short, long)]
        kind: String,
        /// Desired value, e.g. on/off or auto/manual
        #[arg(long)]
        value: String,
        /// Seconds to wait for the broker link
        #[arg(long, default_value_t = 15)]
        wait_secs: u64,
    },
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

    if cli.verbose > 0 && std::env::var("LOG_LEVEL").is_err() {
        let level = if cli.verbose > 1 { "TRACE" } else { "DEBUG" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!("Starting agrolink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Watch { device } => run_watch(config, device).await,
        Commands::Command {
            device,
            kind,
            value,
            wait_secs,
        } => run_command(config, device, kind, value, wait_secs).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<DashboardConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(DashboardConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["agrolink.toml", "config/agrolink.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(DashboardConfig::load_from_file(&path)?);
                }
            }

            warn!("No configuration file found, using defaults");
            let config = DashboardConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Transport factory; simulation only when configured explicitly
struct TransportFactory;

impl TransportFactory {
    fn create(config: &DashboardConfig) -> Arc<dyn Transport> {
        match config.transport {
            TransportKind::Mqtt => Arc::new(MqttTransport::new(config.mqtt.clone())),
            TransportKind::Simulation => {
                info!("Using simulated device feed");
                Arc::new(SimulationTransport::new(
                    config.topic_scheme(),
                    Duration::from_millis(config.simulation.interval_ms),
                ))
            }
        }
    }
}

fn build_service(config: &DashboardConfig) -> Arc<LiveDataService> {
    let transport = TransportFactory::create(config);
    Arc::new(LiveDataService::new(config, transport, config.credentials()))
}

async fn run_watch(config: DashboardConfig, device: String) -> Result<(), Box<dyn std::error::Error>> {
    let service = build_service(&config);
    service.start()?;

    let health_port = std::env::var("HEALTH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(config.health.port);
    let health_server = Arc::new(HealthServer::new(health_port, service.clone()));
    let health_task = tokio::spawn(health_server.start());

    let (consumer, mut events) = mpsc::unbounded_channel();
    service.subscribe_device(&device, consumer).await?;
    info!(device_id = %device, "Watching device");

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            }
        }
    });

    let automation = config.automation.enabled.then(|| {
        run_automation(
            service.clone(),
            device.clone(),
            MoistureAutomation::from(&config.automation),
        )
    });

    let mut connection = service.on_state_change();
    let monitor = async {
        while connection.changed().await.is_ok() {
            let state = *connection.borrow_and_update();
            if state == ConnectionState::Degraded {
                warn!(
                    reason = service.degraded_reason().as_deref().unwrap_or("unknown"),
                    "Reconnection abandoned, waiting for shutdown"
                );
            }
        }
    };

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = monitor => {
            error!("Live data service went away");
        }
    }

    service.stop().await;
    if let Some(handle) = automation {
        handle.abort();
    }
    health_task.abort();
    let _ = printer.await;
    Ok(())
}

async fn run_command(
    config: DashboardConfig,
    device: String,
    kind: String,
    value: String,
    wait_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = ReadingKind::parse(&kind).ok_or_else(|| format!("Unknown reading kind: {kind}"))?;
    let service = build_service(&config);
    service.start()?;

    let mut state = service.on_state_change();
    let reached = match timeout(
        Duration::from_secs(wait_secs),
        state.wait_for(|s| s.is_connected() || *s == ConnectionState::Degraded),
    )
    .await
    {
        Ok(Ok(s)) => Ok(*s),
        Ok(Err(_)) => Err("Live data service stopped".to_string()),
        Err(_) => Err(format!("Broker link not established within {wait_secs}s")),
    };

    let result: Result<CommandReceipt, Box<dyn std::error::Error>> = match reached {
        Ok(ConnectionState::Connected) => service
            .send_command(&device, kind, &value)
            .map_err(Into::into),
        Ok(_) => Err(format!(
            "Broker unavailable: {}",
            service.degraded_reason().unwrap_or_default()
        )
        .into()),
        Err(message) => Err(message.into()),
    };

    service.stop().await;

    let receipt = result?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn handle_config_command(
    config: DashboardConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
