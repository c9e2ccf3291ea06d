//! Zenoh gateway for PL20 and Modbus RTU field-bus slaves.
//!
//! The gateway polls holding registers on a serial field bus and publishes
//! their scaled values to Zenoh. Inbound messages on configured topics are
//! written back to registers.
//!
//! # Polling
//!
//! Tags are grouped into update cycles, each with its own interval. Tags on
//! the same slave that share a group number are fetched with one read
//! covering their address span (at most 125 registers). Failed reads feed a
//! per-tag noread policy and a per-slave online/offline state.
//!
//! # Key Expressions
//!
//! Topics are configured per tag. The bridge status is published to:
//!
//! ```text
//! <key_prefix>/@/status
//! ```

pub mod bridge;
pub mod config;
pub mod cputemp;
pub mod engine;
pub mod error;
pub mod pl20;
pub mod reader;
pub mod slave;
pub mod store;
pub mod tag;
pub mod transport;

pub use config::GatewayConfig;
pub use engine::{Daemon, Engine};
pub use error::GatewayError;
