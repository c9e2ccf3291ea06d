//! Gateway error types.
//!
//! Only configuration and transport-open errors stop the daemon. The rest are
//! logged where they happen and folded into tag and slave state. Bus failures
//! themselves are [`TransportError`](crate::transport::TransportError)s.

use plgate_bridge_framework::BridgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] BridgeError),

    #[error("Failed to open {device}: {message}")]
    TransportOpen { device: String, message: String },

    #[error("Slave {slave} group {group} spans {count} registers (max {max})")]
    Range {
        slave: u8,
        group: i32,
        count: u32,
        max: u32,
    },

    #[error("No tag subscribed to topic '{0}'")]
    UnmatchedTopic(String),

    #[error("Invalid value for '{topic}': {reason}")]
    InvalidWriteValue { topic: String, reason: String },

    #[error("Duplicate topic '{0}'")]
    DuplicateTopic(String),
}
