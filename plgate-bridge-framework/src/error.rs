//! Error types for the bridge framework.

use std::fmt;

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Broker operation named in [`BridgeError::Broker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOp {
    Publish,
    Retain,
    Clear,
    Subscribe,
}

impl fmt::Display for BrokerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrokerOp::Publish => "publish",
            BrokerOp::Retain => "retain",
            BrokerOp::Clear => "clear",
            BrokerOp::Subscribe => "subscribe",
        })
    }
}

/// Errors raised by the framework. The configuration variants are fatal at
/// startup; broker variants are reported per call.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Cannot parse configuration: {0}")]
    ConfigParse(String),

    #[error("Configuration rejected: {0}")]
    ConfigValidation(String),

    #[error("Cannot open Zenoh session: {0}")]
    ZenohConnection(String),

    #[error("Zenoh session error: {0}")]
    ZenohSession(String),

    /// A publish, clear or subscribe on one topic failed.
    #[error("Broker {op} on '{topic}' failed: {message}")]
    Broker {
        op: BrokerOp,
        topic: String,
        message: String,
    },

    #[error("Broker is not connected")]
    NotConnected,

    #[error("Cannot encode payload: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    pub(crate) fn broker(op: BrokerOp, topic: &str, err: impl fmt::Display) -> Self {
        Self::Broker {
            op,
            topic: topic.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}
