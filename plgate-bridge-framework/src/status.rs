//! Bridge status, published retained to `{key_prefix}/@/status`.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::broker::Broker;

/// Lifecycle state reported in [`BridgeStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Running,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "pl20").
    pub bridge: String,
    pub version: String,
    pub status: BridgeState,
    /// Bridge-specific fields, flattened into the top-level object.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    pub fn new(bridge: impl Into<String>, version: impl Into<String>, state: BridgeState) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: state,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(bridge, version, BridgeState::Running)
    }

    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(bridge, version, BridgeState::Offline)
    }

    pub fn with_metadata(self, metadata: serde_json::Value) -> Self {
        Self { metadata, ..self }
    }

    pub fn key(key_prefix: &str) -> String {
        format!("{}/@/status", key_prefix)
    }

    /// Serialize to JSON and publish retained.
    pub async fn publish<B: Broker>(&self, broker: &mut B, key_prefix: &str) -> Result<()> {
        let payload = serde_json::to_string(self)?;
        broker.publish(&Self::key(key_prefix), &payload, true).await
    }
}
