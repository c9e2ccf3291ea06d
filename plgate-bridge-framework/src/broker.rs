//! Message broker seam and its Zenoh implementation.
//!
//! The gateway core only talks to a [`Broker`]: publish a formatted value,
//! clear a retained value, subscribe to a topic. Inbound traffic and
//! connection changes arrive as [`BrokerEvent`]s on a channel that the run
//! loop drains between ticks, so the core never sees a callback.
//!
//! # Retained values on Zenoh
//!
//! Zenoh has no broker-side retained message, so [`ZenohBroker`] keeps the
//! last retained payload per topic and answers queries for it with a
//! queryable. Subscribing issues a `get` alongside the live subscriber;
//! replies are delivered with `retained: true`, live samples with
//! `retained: false`. Clearing drops the stored payload and emits a Zenoh
//! `delete` on the topic.
//!
//! # Connection state
//!
//! A Zenoh session re-establishes its transports on its own and reports no
//! loss of connectivity to the application. [`ZenohBroker`] is therefore
//! connected from `connect` until `close`, which is also the only place a
//! [`BrokerEvent::Disconnected`] is queued. Failed puts surface as
//! [`BridgeError::Broker`] on the call that made them.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use zenoh::Session;
use zenoh::Wait;
use zenoh::pubsub::Subscriber;
use zenoh::query::Queryable;
use zenoh::sample::{Sample, SampleKind};

use crate::config::ZenohConfig;
use crate::error::{BridgeError, BrokerOp, Result};

/// A message delivered by the broker for a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    /// The value was replayed from the retained store rather than published live.
    pub retained: bool,
}

/// Notifications from the broker to the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    Disconnected,
    Message(InboundMessage),
}

/// Publish/subscribe operations the gateway core needs from a broker.
#[allow(async_fn_in_trait)]
pub trait Broker {
    /// Whether publishing is currently possible.
    fn is_connected(&self) -> bool;

    /// Publish a formatted value.
    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<()>;

    /// Remove the retained value of a topic.
    async fn clear_retained(&mut self, topic: &str) -> Result<()>;

    /// Start delivering messages for a topic as [`BrokerEvent::Message`].
    async fn subscribe(&mut self, topic: &str) -> Result<()>;
}

type RetainedStore = Arc<RwLock<HashMap<String, String>>>;

/// [`Broker`] backed by a Zenoh session.
pub struct ZenohBroker {
    session: Session,
    connected: bool,
    retained: RetainedStore,
    queryables: HashMap<String, Queryable<()>>,
    subscribers: HashMap<String, Subscriber<()>>,
    events: mpsc::UnboundedSender<BrokerEvent>,
}

impl std::fmt::Debug for ZenohBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZenohBroker")
            .field("zid", &self.session.zid())
            .field("connected", &self.connected)
            .field("subscriptions", &self.subscribers.len())
            .field("retained_topics", &self.queryables.len())
            .finish_non_exhaustive()
    }
}

impl ZenohBroker {
    /// Open a Zenoh session and return the broker with its event stream.
    ///
    /// A [`BrokerEvent::Connected`] is queued as soon as the session is open.
    pub async fn connect(
        config: &ZenohConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<BrokerEvent>)> {
        let session = open_session(config).await?;
        let (events, receiver) = mpsc::unbounded_channel();

        // The receiver is returned below, so this send cannot fail.
        let _ = events.send(BrokerEvent::Connected);

        let broker = Self {
            session,
            connected: true,
            retained: Arc::new(RwLock::new(HashMap::new())),
            queryables: HashMap::new(),
            subscribers: HashMap::new(),
            events,
        };
        Ok((broker, receiver))
    }

    /// Access the underlying Zenoh session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Undeclare everything and close the session.
    pub async fn close(mut self) -> Result<()> {
        self.connected = false;
        self.subscribers.clear();
        self.queryables.clear();
        let _ = self.events.send(BrokerEvent::Disconnected);
        self.session
            .close()
            .await
            .map_err(|e| BridgeError::ZenohSession(e.to_string()))
    }

    fn store_retained(&self, topic: &str, payload: &str) {
        self.retained
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), payload.to_string());
    }

    async fn ensure_queryable(&mut self, topic: &str) -> Result<()> {
        if self.queryables.contains_key(topic) {
            return Ok(());
        }

        let store = self.retained.clone();
        let key = topic.to_string();
        let queryable = self
            .session
            .declare_queryable(topic)
            .callback(move |query| {
                let value = store
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&key)
                    .cloned();
                if let Some(value) = value {
                    if let Err(e) = query.reply(key.as_str(), value).wait() {
                        tracing::warn!(topic = %key, error = %e, "Failed to answer retained query");
                    }
                }
            })
            .await
            .map_err(|e| BridgeError::broker(BrokerOp::Retain, topic, e))?;

        tracing::debug!(topic = %topic, "Declared retained queryable");
        self.queryables.insert(topic.to_string(), queryable);
        Ok(())
    }
}

impl Broker for ZenohBroker {
    /// True while the session is open.
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        if !self.connected {
            return Err(BridgeError::NotConnected);
        }
        if retain {
            self.store_retained(topic, payload);
            self.ensure_queryable(topic).await?;
        }

        self.session
            .put(topic, payload.to_string())
            .await
            .map_err(|e| BridgeError::broker(BrokerOp::Publish, topic, e))?;

        tracing::trace!(topic = %topic, payload = %payload, retain, "Published");
        Ok(())
    }

    async fn clear_retained(&mut self, topic: &str) -> Result<()> {
        if !self.connected {
            return Err(BridgeError::NotConnected);
        }
        self.retained
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);

        self.session
            .delete(topic)
            .await
            .map_err(|e| BridgeError::broker(BrokerOp::Clear, topic, e))?;

        tracing::trace!(topic = %topic, "Cleared retained value");
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        if !self.connected {
            return Err(BridgeError::NotConnected);
        }

        if !self.subscribers.contains_key(topic) {
            let events = self.events.clone();
            let subscriber = self
                .session
                .declare_subscriber(topic)
                .callback(move |sample| {
                    if let Some(message) = inbound_message(&sample, false) {
                        let _ = events.send(BrokerEvent::Message(message));
                    }
                })
                .await
                .map_err(|e| BridgeError::broker(BrokerOp::Subscribe, topic, e))?;
            self.subscribers.insert(topic.to_string(), subscriber);
        }

        // Replay whatever is currently retained for the topic.
        let events = self.events.clone();
        self.session
            .get(topic)
            .callback(move |reply| {
                if let Ok(sample) = reply.result() {
                    if let Some(message) = inbound_message(sample, true) {
                        let _ = events.send(BrokerEvent::Message(message));
                    }
                }
            })
            .await
            .map_err(|e| BridgeError::broker(BrokerOp::Subscribe, topic, e))?;

        tracing::debug!(topic = %topic, "Subscribed");
        Ok(())
    }
}

fn inbound_message(sample: &Sample, retained: bool) -> Option<InboundMessage> {
    if sample.kind() == SampleKind::Delete {
        return None;
    }
    let topic = sample.key_expr().as_str().to_string();
    match sample.payload().try_to_string() {
        Ok(payload) => Some(InboundMessage {
            topic,
            payload: payload.into_owned(),
            retained,
        }),
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Dropping non UTF-8 payload");
            None
        }
    }
}

async fn open_session(config: &ZenohConfig) -> Result<Session> {
    let mut zenoh_config = zenoh::Config::default();

    let mode = match config.mode.as_str() {
        "client" | "peer" | "router" => format!("\"{}\"", config.mode),
        other => {
            return Err(BridgeError::config(format!(
                "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                other
            )));
        }
    };
    zenoh_config
        .insert_json5("mode", &mode)
        .map_err(|e| BridgeError::config(format!("Failed to set mode: {}", e)))?;

    if !config.connect.is_empty() {
        zenoh_config
            .insert_json5("connect/endpoints", &serde_json::to_string(&config.connect)?)
            .map_err(|e| BridgeError::config(format!("Failed to set connect endpoints: {}", e)))?;
    }
    if !config.listen.is_empty() {
        zenoh_config
            .insert_json5("listen/endpoints", &serde_json::to_string(&config.listen)?)
            .map_err(|e| BridgeError::config(format!("Failed to set listen endpoints: {}", e)))?;
    }

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config)
        .await
        .map_err(|e| BridgeError::ZenohConnection(e.to_string()))?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_equality() {
        let a = BrokerEvent::Message(InboundMessage {
            topic: "plgate/setpoint".to_string(),
            payload: "42".to_string(),
            retained: true,
        });
        assert_eq!(a.clone(), a);
        assert_ne!(a, BrokerEvent::Connected);
    }

    #[tokio::test]
    async fn test_invalid_mode_rejected() {
        let config = ZenohConfig {
            mode: "broker".to_string(),
            ..ZenohConfig::default()
        };
        let result = ZenohBroker::connect(&config).await;
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
