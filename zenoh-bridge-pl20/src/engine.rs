//! The polling engine and its update-cycle scheduler.
//!
//! One [`Engine`] owns every piece of gateway state: field tags, write tags,
//! update cycles, slave health, the software tag store, the bus transport and
//! the broker. It is driven by a single task; nothing in here is shared.

use std::collections::HashSet;
use std::time::Duration;

use plgate_bridge_framework::{BridgeError, Broker, BrokerEvent, Cyclic};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, UpdateCycleConfig};
use crate::cputemp;
use crate::error::GatewayError;
use crate::reader::GroupRead;
use crate::slave::SlaveTable;
use crate::store::{SoftwareTag, TagCallback, TagSource, TagStore, TagValue};
use crate::tag::{FieldTag, ReadStamp, WriteTag};
use crate::transport::{RegisterTransport, TransportError};

/// A set of field tags polled at a fixed interval.
#[derive(Debug, Clone)]
pub struct UpdateCycle {
    pub id: u32,
    /// Seconds between firings.
    pub interval: i64,
    pub next_update_time: i64,
    /// Indices into the engine's field tags, in polling order.
    pub tags: Vec<usize>,
}

impl UpdateCycle {
    pub fn from_config(config: &UpdateCycleConfig) -> Self {
        Self {
            id: config.id,
            interval: i64::try_from(config.interval_secs).unwrap_or(i64::MAX),
            next_update_time: 0,
            tags: Vec::new(),
        }
    }

    pub fn due(&self, now: i64) -> bool {
        !self.tags.is_empty() && now >= self.next_update_time
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Pause after every bus transaction.
    pub inter_slave_delay: Duration,
    pub clear_on_exit: bool,
    pub noread_on_exit: bool,
}

pub struct Engine<T, B> {
    pub(crate) tags: Vec<FieldTag>,
    pub(crate) write_tags: Vec<WriteTag>,
    pub(crate) cycles: Vec<UpdateCycle>,
    pub(crate) slaves: SlaveTable,
    pub(crate) store: TagStore,
    pub(crate) transport: T,
    pub(crate) broker: B,
    pub(crate) settings: EngineSettings,
    firings: u64,
}

impl<T: RegisterTransport, B: Broker> Engine<T, B> {
    /// Build the engine from a validated configuration.
    ///
    /// Every cycle is due immediately; `now` seeds the software tag schedule.
    pub fn new(
        config: &GatewayConfig,
        transport: T,
        broker: B,
        now: i64,
    ) -> Result<Self, GatewayError> {
        let mut cycles: Vec<UpdateCycle> = config
            .update_cycles
            .iter()
            .map(UpdateCycle::from_config)
            .collect();
        let mut slaves = SlaveTable::new(config.bus.max_retries());
        let mut tags = Vec::new();

        for slave in &config.slaves {
            slaves
                .register(slave.id, config.slave_status_topic(slave.id))
                .name
                .clone_from(&slave.name);
            for tag_config in &slave.tags {
                let index = tags.len();
                let cycle = cycles
                    .iter_mut()
                    .find(|c| c.id == tag_config.update_cycle)
                    .ok_or_else(|| {
                        BridgeError::validation(format!(
                            "Slave {}: unknown update_cycle {}",
                            slave.id, tag_config.update_cycle
                        ))
                    })?;
                cycle.tags.push(index);
                slaves.register(slave.id, None).read_tags.push(index);
                tags.push(FieldTag::from_config(
                    slave.id,
                    tag_config,
                    config.gateway.retain_default,
                ));
            }
        }

        let mut store = TagStore::new();
        let mut write_tags = Vec::new();
        for (index, write_config) in config.write_tags.iter().enumerate() {
            let slave_id = write_config.slave_id;
            slaves
                .register(slave_id, config.slave_status_topic(slave_id))
                .write_tags
                .push(index);
            store.add(SoftwareTag::subscriber(
                write_config.topic.clone(),
                TagCallback::WriteRequest(index),
            ))?;
            write_tags.push(WriteTag::from_config(write_config));
        }

        if let Some(cpu) = &config.cpu_temp {
            let mut tag = SoftwareTag::sampled(
                cpu.topic.clone(),
                TagSource::CpuTemperature(cpu.path.clone()),
                i64::try_from(cpu.read_interval_secs).unwrap_or(i64::MAX),
                i64::try_from(cpu.publish_interval_secs).unwrap_or(i64::MAX),
                now,
            );
            tag.retain = config.gateway.retain_default;
            store.add(tag)?;
        }

        info!(
            slaves = slaves.len(),
            tags = tags.len(),
            write_tags = write_tags.len(),
            cycles = cycles.len(),
            "Engine configured"
        );

        Ok(Self {
            tags,
            write_tags,
            cycles,
            slaves,
            store,
            transport,
            broker,
            settings: EngineSettings {
                inter_slave_delay: config.bus.inter_slave_delay(),
                clear_on_exit: config.gateway.clear_on_exit,
                noread_on_exit: config.gateway.noread_on_exit,
            },
            firings: 0,
        })
    }

    pub fn tags(&self) -> &[FieldTag] {
        &self.tags
    }

    pub fn write_tags(&self) -> &[WriteTag] {
        &self.write_tags
    }

    pub fn cycles(&self) -> &[UpdateCycle] {
        &self.cycles
    }

    pub fn slaves(&self) -> &SlaveTable {
        &self.slaves
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn into_parts(self) -> (T, B) {
        (self.transport, self.broker)
    }

    /// Run one tick at `now` (unix seconds); returns `true` if bus work ran.
    ///
    /// The field bus is only touched while the broker is connected. Software
    /// tags are sampled regardless.
    pub async fn process(&mut self, now: i64) -> bool {
        let mut busy = false;
        if self.broker.is_connected() {
            busy |= self.read_process(now).await;
            busy |= self.write_process().await;
        }
        self.software_process(now).await;
        busy
    }

    /// Fire every due update cycle, in declaration order.
    async fn read_process(&mut self, now: i64) -> bool {
        let mut busy = false;

        for c in 0..self.cycles.len() {
            if !self.cycles[c].due(now) {
                continue;
            }
            let cycle = &mut self.cycles[c];
            cycle.next_update_time = now.saturating_add(cycle.interval);
            let list = std::mem::take(&mut cycle.tags);

            self.firings += 1;
            let stamp = ReadStamp(self.firings);
            debug!(cycle = self.cycles[c].id, tags = list.len(), "Update cycle");

            let mut failed = HashSet::new();
            for position in 0..list.len() {
                let outcome = self.read_grouped(&list, position, stamp, &mut failed).await;
                if outcome == GroupRead::Declined {
                    self.read_single(list[position], stamp).await;
                }
                self.inter_slave_delay().await;
            }

            self.cycles[c].tags = list;
            busy = true;
        }
        busy
    }

    /// Dispatch at most one pending write, visiting slaves in id order.
    async fn write_process(&mut self) -> bool {
        let Some(index) = self
            .slaves
            .iter()
            .flat_map(|s| s.write_tags.iter().copied())
            .find(|&i| self.write_tags.get(i).is_some_and(|t| t.write_pending))
        else {
            return false;
        };
        let tag = &mut self.write_tags[index];
        tag.write_pending = false;
        let (slave, address, value) = (tag.slave_id, tag.address, tag.raw_value);

        match self.transport.write_register(slave, address, value).await {
            Ok(()) => {
                debug!(slave, address, value, "Register written");
                self.record_slave_success(slave).await;
            }
            Err(TransportError::Unsupported(what)) => {
                warn!(slave, address, "{} not supported, write dropped", what);
            }
            Err(e) => {
                warn!(slave, address, value, error = %e, "Register write failed");
                self.record_slave_failure(slave).await;
            }
        }

        self.inter_slave_delay().await;
        true
    }

    /// Sample and publish software tags that are due.
    async fn software_process(&mut self, now: i64) {
        let connected = self.broker.is_connected();

        for tag in self.store.iter_mut() {
            if tag.read_due(now) {
                tag.next_read_time = now.saturating_add(tag.read_interval);
                if let Some(TagSource::CpuTemperature(path)) = &tag.source {
                    match cputemp::read_temperature(path) {
                        Ok(celsius) => tag.value = TagValue::Number(celsius),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Failed to read CPU temperature")
                        }
                    }
                }
            }

            if connected && tag.publish_due(now) {
                tag.next_publish_time = now.saturating_add(tag.publish_interval);
                if let TagValue::Number(value) = tag.value {
                    let payload = format!("{:.1}", value);
                    if let Err(e) = self.broker.publish(&tag.topic, &payload, tag.retain).await {
                        warn!(topic = %tag.topic, error = %e, "Failed to publish software tag");
                    }
                }
            }
        }
    }

    pub(crate) async fn inter_slave_delay(&self) {
        if !self.settings.inter_slave_delay.is_zero() {
            tokio::time::sleep(self.settings.inter_slave_delay).await;
        }
    }

    /// Take slaves offline, close the bus and apply the exit switches.
    pub async fn shutdown(&mut self) {
        for slave in self.slaves.online_ids() {
            if let Some(transition) = self.slaves.set_offline(slave) {
                self.publish_slave_status(slave, transition).await;
            }
        }

        self.transport.close().await;

        let (noread, clear) = (self.settings.noread_on_exit, self.settings.clear_on_exit);
        if noread || clear {
            self.clear_tags(noread, clear).await;
        }
        info!("Engine stopped");
    }
}

/// Couples an [`Engine`] with the broker's event stream for the run loop.
pub struct Daemon<T, B> {
    engine: Engine<T, B>,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
}

impl<T: RegisterTransport, B: Broker> Daemon<T, B> {
    pub fn new(engine: Engine<T, B>, events: mpsc::UnboundedReceiver<BrokerEvent>) -> Self {
        Self { engine, events }
    }

    pub fn engine(&self) -> &Engine<T, B> {
        &self.engine
    }

    pub fn into_engine(self) -> Engine<T, B> {
        self.engine
    }

    /// Hand every queued broker event to the engine.
    pub async fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.engine.handle_event(event).await;
        }
    }
}

impl<T: RegisterTransport, B: Broker> Cyclic for Daemon<T, B> {
    async fn tick(&mut self) -> bool {
        self.drain_events().await;
        self.engine.process(chrono::Utc::now().timestamp()).await
    }
}
