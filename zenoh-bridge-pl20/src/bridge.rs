//! Publisher bridge: outbound tag values, slave status and inbound routing.

use plgate_bridge_framework::{Broker, BrokerEvent, InboundMessage};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::GatewayError;
use crate::slave::Transition;
use crate::store::TagCallback;
use crate::tag::Publication;
use crate::transport::RegisterTransport;

impl<T: RegisterTransport, B: Broker> Engine<T, B> {
    /// Publish a field tag according to its value and noread policy.
    pub(crate) async fn publish_field_tag(&mut self, index: usize) {
        let Some(tag) = self.tags.get(index) else {
            return;
        };
        if tag.topic.is_empty() {
            return;
        }

        let result = match tag.publication() {
            Publication::Value(payload) | Publication::NoreadValue(payload) => {
                self.broker.publish(&tag.topic, &payload, tag.retain).await
            }
            Publication::ClearRetained => self.broker.clear_retained(&tag.topic).await,
            Publication::Nothing => Ok(()),
        };

        if let Err(e) = result {
            warn!(topic = %tag.topic, error = %e, "Failed to publish tag");
        }
    }

    pub(crate) async fn record_slave_success(&mut self, slave: u8) {
        if let Some(transition) = self.slaves.record_success(slave) {
            self.publish_slave_status(slave, transition).await;
        }
    }

    pub(crate) async fn record_slave_failure(&mut self, slave: u8) {
        if let Some(transition) = self.slaves.record_failure(slave) {
            self.publish_slave_status(slave, transition).await;
        }
    }

    pub(crate) async fn publish_slave_status(&mut self, slave: u8, transition: Transition) {
        let Some(status) = self.slaves.get(slave) else {
            return;
        };
        let online = transition.online();
        let name = status.name.as_deref().unwrap_or_default();
        if online {
            info!(slave, name, "Slave online");
        } else {
            warn!(slave, name, "Slave offline");
        }

        let Some(topic) = status.status_topic.as_deref() else {
            return;
        };
        let payload = if online { "true" } else { "false" };
        if let Err(e) = self.broker.publish(topic, payload, true).await {
            warn!(slave, topic = %topic, error = %e, "Failed to publish slave status");
        }
    }

    /// React to a broker notification.
    pub async fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected => {
                info!("Broker connected");
                self.subscribe_tags().await;
            }
            BrokerEvent::Disconnected => warn!("Broker disconnected"),
            BrokerEvent::Message(message) => self.handle_message(message),
        }
    }

    async fn subscribe_tags(&mut self) {
        for tag in self.store.iter().filter(|t| t.subscribe) {
            if let Err(e) = self.broker.subscribe(&tag.topic).await {
                warn!(topic = %tag.topic, error = %e, "Failed to subscribe");
            }
        }
    }

    /// Route an inbound message to the software tag with the same topic.
    pub fn handle_message(&mut self, message: InboundMessage) {
        let Some(tag) = self.store.get_mut(&message.topic) else {
            let error = GatewayError::UnmatchedTopic(message.topic);
            warn!(error = %error, "Dropping inbound message");
            return;
        };

        debug!(topic = %message.topic, retained = message.retained, "Inbound message");
        if let Some(TagCallback::WriteRequest(index)) =
            tag.set_text(&message.payload, message.retained)
        {
            self.write_request(index, &message.payload, message.retained);
        }
    }

    fn write_request(&mut self, index: usize, payload: &str, retained: bool) {
        let Some(tag) = self.write_tags.get_mut(index) else {
            warn!(index, "Write request for unknown write tag");
            return;
        };
        tag.value_is_retained = retained;

        if retained && tag.ignore_retained {
            debug!(topic = %tag.topic, "Ignoring retained write request");
            return;
        }

        match tag.data_type.parse(payload) {
            Ok(raw) => {
                tag.raw_value = raw;
                tag.write_pending = true;
                debug!(
                    topic = %tag.topic,
                    slave = tag.slave_id,
                    address = tag.address,
                    raw,
                    "Write queued"
                );
            }
            Err(reason) => {
                let error = GatewayError::InvalidWriteValue {
                    topic: tag.topic.clone(),
                    reason,
                };
                warn!(error = %error, "Dropping write request");
            }
        }
    }

    /// Publish noread values and/or clear retained values on exit.
    pub(crate) async fn clear_tags(&mut self, noread: bool, clear: bool) {
        for tag in self.tags.iter().filter(|t| !t.topic.is_empty()) {
            if noread {
                let payload = tag.formatted_noread_value();
                if let Err(e) = self.broker.publish(&tag.topic, &payload, tag.retain).await {
                    warn!(topic = %tag.topic, error = %e, "Failed to publish noread value");
                }
            }
            if clear {
                if let Err(e) = self.broker.clear_retained(&tag.topic).await {
                    warn!(topic = %tag.topic, error = %e, "Failed to clear retained value");
                }
            }
        }

        if clear {
            for tag in self.store.iter().filter(|t| t.publish) {
                if let Err(e) = self.broker.clear_retained(&tag.topic).await {
                    warn!(topic = %tag.topic, error = %e, "Failed to clear retained value");
                }
            }
        }
    }
}
