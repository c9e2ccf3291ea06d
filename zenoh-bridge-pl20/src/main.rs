//! Zenoh gateway for PL20 and Modbus RTU field-bus slaves.

use std::time::Duration;

use anyhow::{Context, Result};
use plgate_bridge_framework::{
    BridgeArgs, BridgeConfig, BridgeStatus, BrokerEvent, LoopRunner, ShutdownFlag,
    ZenohBroker, init_tracing,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use zenoh_bridge_pl20::config::BusConfig;
use zenoh_bridge_pl20::pl20::{Pl20, SerialOpener};
use zenoh_bridge_pl20::transport::{ModbusRtuTransport, Pl20Transport, RegisterTransport};
use zenoh_bridge_pl20::{Daemon, Engine, GatewayConfig, GatewayError};

const BRIDGE_NAME: &str = "pl20";

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("plgate.json5");

    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut logging = config.logging.clone();
    if let Some(level) = args.log_level_override() {
        logging.level = level;
    }
    init_tracing(&logging).context("Failed to init tracing")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Starting zenoh-bridge-pl20"
    );
    info!("Loaded configuration from {:?}", args.config);

    let shutdown = ShutdownFlag::new();
    shutdown.install_signal_handlers();

    let (mut broker, events) = ZenohBroker::connect(&config.zenoh)
        .await
        .context("Failed to connect to Zenoh")?;

    let status = BridgeStatus::running(BRIDGE_NAME, env!("CARGO_PKG_VERSION")).with_metadata(
        serde_json::json!({
            "bus": config.bus.protocol(),
            "device": config.bus.device(),
            "slaves": config.slaves.iter().map(|s| s.id).collect::<Vec<_>>(),
        }),
    );
    if let Err(e) = status.publish(&mut broker, config.key_prefix()).await {
        warn!(error = %e, "Failed to publish bridge status");
    }

    match &config.bus {
        BusConfig::ModbusRtu {
            device,
            baud_rate,
            response_timeout_ms,
            debug_level,
            ..
        } => {
            let transport = ModbusRtuTransport::open(
                device,
                *baud_rate,
                Duration::from_millis(*response_timeout_ms),
                *debug_level,
            )?;
            run(&config, transport, broker, events, shutdown).await
        }
        BusConfig::Pl20 {
            device,
            baud_rate,
            memory,
            ..
        } => {
            let mut pl20 = Pl20::new(SerialOpener::new(device.clone(), *baud_rate));
            pl20.open().map_err(|e| GatewayError::TransportOpen {
                device: device.clone(),
                message: e.to_string(),
            })?;
            run(
                &config,
                Pl20Transport::new(pl20, *memory),
                broker,
                events,
                shutdown,
            )
            .await
        }
    }
}

async fn run<T: RegisterTransport>(
    config: &GatewayConfig,
    transport: T,
    broker: ZenohBroker,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    shutdown: ShutdownFlag,
) -> Result<()> {
    let engine = Engine::new(config, transport, broker, chrono::Utc::now().timestamp())?;
    let mut daemon = Daemon::new(engine, events);

    info!(
        bus = config.bus.protocol(),
        slaves = config.slaves.len(),
        "PL20 gateway running"
    );

    let mut runner = LoopRunner::new(config.gateway.main_loop_interval_ms, shutdown);
    runner.run(&mut daemon).await;

    let mut engine = daemon.into_engine();
    engine.shutdown().await;
    let (_, mut broker) = engine.into_parts();

    let status = BridgeStatus::offline(BRIDGE_NAME, env!("CARGO_PKG_VERSION"));
    if let Err(e) = status.publish(&mut broker, config.key_prefix()).await {
        warn!(error = %e, "Failed to publish bridge status");
    }
    broker
        .close()
        .await
        .context("Failed to close Zenoh session")?;
    info!("PL20 gateway stopped");

    Ok(())
}
