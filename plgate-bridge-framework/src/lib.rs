//! PL Gate Bridge Framework
//!
//! Common glue for bridges that poll field-bus hardware and publish to Zenoh.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`Broker`] seam with the [`ZenohBroker`] implementation
//! - [`LoopRunner`] for the fixed-period cooperative run loop
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use plgate_bridge_framework::{BridgeArgs, BridgeConfig, LoopRunner, ShutdownFlag, ZenohBroker};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!     init_tracing(config.logging())?;
//!
//!     let (broker, events) = ZenohBroker::connect(config.zenoh()).await?;
//!     let shutdown = ShutdownFlag::new();
//!     shutdown.install_signal_handlers();
//!
//!     let mut worker = MyWorker::new(broker, events);
//!     LoopRunner::new(250, shutdown).run(&mut worker).await;
//!     Ok(())
//! }
//! ```

mod args;
pub mod broker;
mod config;
mod error;
pub mod runner;
mod status;

pub use args::BridgeArgs;
pub use broker::{Broker, BrokerEvent, InboundMessage, ZenohBroker};
pub use config::{BridgeConfig, LogFormat, LoggingConfig, ZenohConfig};
pub use error::{BridgeError, BrokerOp, Result};
pub use runner::{Cyclic, LoopRunner, ShutdownFlag, TickStats, clamp_loop_interval};
pub use status::{BridgeState, BridgeStatus};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two output
/// formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    }
    .map_err(|e| BridgeError::config(format!("Failed to initialize tracing: {}", e)))
}
