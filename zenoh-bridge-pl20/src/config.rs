//! Configuration for the PL20 / Modbus RTU gateway.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use plgate_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, Result, ZenohConfig};
use serde::{Deserialize, Serialize};

use crate::cputemp::DEFAULT_THERMAL_PATH;
use crate::reader::{MAX_READ_REGISTERS, RegisterSpan};
use crate::tag::{DataType, NoreadAction};

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Daemon-wide settings
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Field bus the slaves hang off
    pub bus: BusConfig,

    /// Polling cycles, fired in declaration order
    #[serde(default)]
    pub update_cycles: Vec<UpdateCycleConfig>,

    /// Slaves and their polled registers
    #[serde(default)]
    pub slaves: Vec<SlaveConfig>,

    /// Registers written from inbound broker messages
    #[serde(default)]
    pub write_tags: Vec<WriteTagConfig>,

    /// Optional CPU temperature software tag
    #[serde(default)]
    pub cpu_temp: Option<CpuTempConfig>,
}

/// Daemon-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Key expression prefix for bridge status (default: "plgate/pl20")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Main loop period in milliseconds, clamped to 50..=2000
    #[serde(default = "default_main_loop_interval")]
    pub main_loop_interval_ms: u64,

    /// Retain flag for tags that do not set their own
    #[serde(default)]
    pub retain_default: bool,

    /// Clear retained tag values on exit
    #[serde(default)]
    pub clear_on_exit: bool,

    /// Publish each tag's noread value on exit
    #[serde(default)]
    pub noread_on_exit: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            main_loop_interval_ms: default_main_loop_interval(),
            retain_default: false,
            clear_on_exit: false,
            noread_on_exit: false,
        }
    }
}

fn default_key_prefix() -> String {
    "plgate/pl20".to_string()
}

fn default_main_loop_interval() -> u64 {
    250
}

/// Field-bus connection (Modbus RTU or PL20).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusConfig {
    /// Modbus RTU master on a serial line
    ModbusRtu {
        /// Serial device path (e.g., "/dev/ttyUSB0")
        device: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Per-request response timeout in milliseconds
        #[serde(default = "default_response_timeout_ms")]
        response_timeout_ms: u64,
        /// Consecutive failures before a slave is flagged offline
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        /// Pause after every bus transaction, in microseconds
        #[serde(default)]
        inter_slave_delay_us: u64,
        /// 0 = quiet, 1 = log transactions, 2 = also log register values
        #[serde(default)]
        debug_level: u8,
        /// Slave status topic template; `{slave}` is replaced by the id
        #[serde(default)]
        slave_status_topic: Option<String>,
    },
    /// PL20 controller on a serial line
    Pl20 {
        /// Serial device path
        device: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Memory bank to read from
        #[serde(default)]
        memory: Memory,
        /// Consecutive failures before the slave is flagged offline
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        /// Pause after every bus transaction, in microseconds
        #[serde(default)]
        inter_slave_delay_us: u64,
        /// Slave status topic template; `{slave}` is replaced by the id
        #[serde(default)]
        slave_status_topic: Option<String>,
    },
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_response_timeout_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

impl BusConfig {
    pub fn device(&self) -> &str {
        match self {
            BusConfig::ModbusRtu { device, .. } | BusConfig::Pl20 { device, .. } => device,
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            BusConfig::ModbusRtu { max_retries, .. } | BusConfig::Pl20 { max_retries, .. } => {
                *max_retries
            }
        }
    }

    pub fn inter_slave_delay(&self) -> Duration {
        match self {
            BusConfig::ModbusRtu {
                inter_slave_delay_us,
                ..
            }
            | BusConfig::Pl20 {
                inter_slave_delay_us,
                ..
            } => Duration::from_micros(*inter_slave_delay_us),
        }
    }

    pub fn slave_status_topic(&self) -> Option<&str> {
        match self {
            BusConfig::ModbusRtu {
                slave_status_topic, ..
            }
            | BusConfig::Pl20 {
                slave_status_topic, ..
            } => slave_status_topic.as_deref(),
        }
    }

    /// Protocol name used in logs and the bridge status.
    pub fn protocol(&self) -> &'static str {
        match self {
            BusConfig::ModbusRtu { .. } => "modbus_rtu",
            BusConfig::Pl20 { .. } => "pl20",
        }
    }
}

/// PL20 memory bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Memory {
    #[default]
    Ram,
    Eeprom,
}

/// A named polling interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCycleConfig {
    pub id: u32,
    pub interval_secs: u64,
}

/// A slave on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    /// Bus address (1-254)
    pub id: u8,

    /// Optional name for logs
    #[serde(default)]
    pub name: Option<String>,

    /// Status topic overriding the bus-wide template
    #[serde(default)]
    pub status_topic: Option<String>,

    /// Registers polled on this slave
    #[serde(default)]
    pub tags: Vec<TagConfig>,
}

/// A polled holding register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Register address
    pub address: u16,

    /// Read group; tags sharing a group on one slave are read in one request
    #[serde(default)]
    pub group: i32,

    /// Id of the update cycle driving this tag
    pub update_cycle: u32,

    /// Topic to publish to; empty means never published
    #[serde(default)]
    pub topic: String,

    /// Register interpretation
    #[serde(default)]
    pub data_type: DataType,

    /// Scaling factor (value * scale)
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Offset (value * scale + offset)
    #[serde(default)]
    pub offset: f64,

    /// Fixed number of decimals when publishing
    #[serde(default)]
    pub decimals: Option<u8>,

    /// Retain flag; falls back to `gateway.retain_default`
    #[serde(default)]
    pub retain: Option<bool>,

    #[serde(default)]
    pub noread_action: NoreadAction,

    #[serde(default)]
    pub noread_value: f64,

    /// Noreads tolerated before the noread action applies
    #[serde(default)]
    pub noread_ignore: u32,
}

fn default_scale() -> f64 {
    1.0
}

/// A register written from a broker topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteTagConfig {
    pub topic: String,
    pub slave_id: u8,
    pub address: u16,
    #[serde(default)]
    pub data_type: DataType,
    /// Drop retained values replayed at subscription time
    #[serde(default)]
    pub ignore_retained: bool,
}

/// CPU temperature software tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuTempConfig {
    pub topic: String,

    #[serde(default = "default_read_interval")]
    pub read_interval_secs: u64,

    /// 0 disables publishing
    #[serde(default)]
    pub publish_interval_secs: u64,

    /// Thermal zone file, in millidegrees Celsius
    #[serde(default = "default_thermal_path")]
    pub path: PathBuf,
}

fn default_read_interval() -> u64 {
    10
}

fn default_thermal_path() -> PathBuf {
    PathBuf::from(DEFAULT_THERMAL_PATH)
}

impl GatewayConfig {
    /// Status topic of a slave: its own override, else the bus template.
    pub fn slave_status_topic(&self, slave_id: u8) -> Option<String> {
        let own = self
            .slaves
            .iter()
            .find(|s| s.id == slave_id)
            .and_then(|s| s.status_topic.clone());
        own.or_else(|| {
            self.bus
                .slave_status_topic()
                .map(|template| template.replace("{slave}", &slave_id.to_string()))
        })
    }

    fn validate_slaves(&self) -> Result<()> {
        let cycles: HashSet<u32> = self.update_cycles.iter().map(|c| c.id).collect();
        let mut seen = HashSet::new();

        for slave in &self.slaves {
            if !(1..=254).contains(&slave.id) {
                return Err(BridgeError::validation(format!(
                    "Slave id {} out of range (1-254)",
                    slave.id
                )));
            }
            if !seen.insert(slave.id) {
                return Err(BridgeError::validation(format!(
                    "Duplicate slave id {}",
                    slave.id
                )));
            }

            let mut groups: BTreeMap<i32, Vec<u16>> = BTreeMap::new();
            for tag in &slave.tags {
                if !cycles.contains(&tag.update_cycle) {
                    return Err(BridgeError::validation(format!(
                        "Slave {}: tag at address {} references unknown update_cycle {}",
                        slave.id, tag.address, tag.update_cycle
                    )));
                }
                if tag.group >= 1 {
                    let addresses = groups.entry(tag.group).or_default();
                    if addresses.contains(&tag.address) {
                        return Err(BridgeError::validation(format!(
                            "Slave {}: address {} appears twice in group {}",
                            slave.id, tag.address, tag.group
                        )));
                    }
                    addresses.push(tag.address);
                }
            }

            for (group, addresses) in &groups {
                if let Some(span) = RegisterSpan::covering(addresses.iter().copied()) {
                    if span.count() > MAX_READ_REGISTERS {
                        tracing::warn!(
                            slave = slave.id,
                            group,
                            span = span.count(),
                            max = MAX_READ_REGISTERS,
                            "Group spans too many registers, members will be read one by one"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_topics(&self) -> Result<()> {
        let mut topics: HashMap<&str, &str> = HashMap::new();

        for tag in &self.write_tags {
            if tag.topic.is_empty() {
                return Err(BridgeError::validation(format!(
                    "Write tag for slave {} address {} has an empty topic",
                    tag.slave_id, tag.address
                )));
            }
            if !(1..=254).contains(&tag.slave_id) {
                return Err(BridgeError::validation(format!(
                    "Write tag '{}': slave id {} out of range (1-254)",
                    tag.topic, tag.slave_id
                )));
            }
            if topics.insert(&tag.topic, "write tag").is_some() {
                return Err(BridgeError::validation(format!(
                    "Duplicate write tag topic '{}'",
                    tag.topic
                )));
            }
        }

        if let Some(cpu) = &self.cpu_temp {
            if cpu.topic.is_empty() {
                return Err(BridgeError::validation("cpu_temp topic cannot be empty"));
            }
            if cpu.read_interval_secs == 0 {
                return Err(BridgeError::validation(
                    "cpu_temp read_interval_secs must be greater than 0",
                ));
            }
            if let Some(other) = topics.insert(&cpu.topic, "cpu_temp") {
                return Err(BridgeError::validation(format!(
                    "cpu_temp topic '{}' already used by a {}",
                    cpu.topic, other
                )));
            }
        }
        Ok(())
    }
}

impl BridgeConfig for GatewayConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.gateway.key_prefix
    }

    fn validate(&self) -> Result<()> {
        if self.bus.device().is_empty() {
            return Err(BridgeError::validation("Bus device cannot be empty"));
        }

        let mut cycle_ids = HashSet::new();
        for cycle in &self.update_cycles {
            if !cycle_ids.insert(cycle.id) {
                return Err(BridgeError::validation(format!(
                    "Duplicate update cycle id {}",
                    cycle.id
                )));
            }
            if cycle.interval_secs == 0 {
                return Err(BridgeError::validation(format!(
                    "Update cycle {}: interval_secs must be greater than 0",
                    cycle.id
                )));
            }
        }

        self.validate_slaves()?;
        self.validate_topics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        bus: { type: "modbus_rtu", device: "/dev/ttyUSB0" },
        update_cycles: [ { id: 1, interval_secs: 5 } ],
        slaves: [
            {
                id: 5,
                tags: [
                    { address: 10, group: 1, update_cycle: 1, topic: "plant/a" },
                    { address: 12, group: 1, update_cycle: 1, topic: "plant/b" },
                ]
            }
        ]
    }"#;

    fn with_slaves(slaves: &str) -> String {
        format!(
            r#"{{
                bus: {{ type: "modbus_rtu", device: "/dev/ttyUSB0" }},
                update_cycles: [ {{ id: 1, interval_secs: 5 }} ],
                slaves: {}
            }}"#,
            slaves
        )
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = GatewayConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.gateway.key_prefix, "plgate/pl20");
        assert_eq!(config.gateway.main_loop_interval_ms, 250);
        assert_eq!(config.zenoh.mode, "peer");
        assert_eq!(config.slaves[0].tags.len(), 2);

        let tag = &config.slaves[0].tags[0];
        assert_eq!(tag.scale, 1.0);
        assert_eq!(tag.data_type, DataType::U16);
        assert_eq!(tag.noread_action, NoreadAction::Ignore);

        match &config.bus {
            BusConfig::ModbusRtu {
                baud_rate,
                response_timeout_ms,
                max_retries,
                ..
            } => {
                assert_eq!(*baud_rate, 9600);
                assert_eq!(*response_timeout_ms, 500);
                assert_eq!(*max_retries, 3);
            }
            other => panic!("Expected Modbus RTU bus, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_pl20_config() {
        let json = r#"{
            zenoh: { mode: "client", connect: ["tcp/127.0.0.1:7447"] },
            logging: { level: "debug", format: "json" },
            gateway: { key_prefix: "site/boiler", clear_on_exit: true },
            bus: {
                type: "pl20",
                device: "/dev/ttyS1",
                baud_rate: 19200,
                memory: "eeprom",
                max_retries: 5,
                inter_slave_delay_us: 2000,
                slave_status_topic: "site/boiler/{slave}/online",
            },
            update_cycles: [ { id: 1, interval_secs: 1 } ],
            slaves: [
                {
                    id: 1,
                    tags: [
                        {
                            address: 3,
                            update_cycle: 1,
                            topic: "site/boiler/temp",
                            data_type: "float",
                            scale: 0.5,
                            decimals: 1,
                            retain: true,
                            noread_action: "publish_noread_value",
                            noread_value: -99,
                            noread_ignore: 2,
                        }
                    ]
                }
            ],
            cpu_temp: { topic: "site/boiler/cpu", read_interval_secs: 5, publish_interval_secs: 60 },
        }"#;

        let config = GatewayConfig::parse(json).unwrap();
        assert_eq!(config.key_prefix(), "site/boiler");
        assert!(config.gateway.clear_on_exit);
        assert_eq!(config.bus.max_retries(), 5);
        assert_eq!(config.bus.inter_slave_delay(), Duration::from_micros(2000));
        assert_eq!(config.bus.protocol(), "pl20");
        assert_eq!(
            config.slave_status_topic(1).as_deref(),
            Some("site/boiler/1/online")
        );

        if let BusConfig::Pl20 { memory, .. } = &config.bus {
            assert_eq!(*memory, Memory::Eeprom);
        } else {
            panic!("Expected PL20 bus");
        }

        let tag = &config.slaves[0].tags[0];
        assert_eq!(tag.noread_action, NoreadAction::PublishNoreadValue);
        assert_eq!(tag.noread_value, -99.0);
        assert_eq!(tag.decimals, Some(1));

        let cpu = config.cpu_temp.as_ref().unwrap();
        assert_eq!(cpu.path, PathBuf::from(DEFAULT_THERMAL_PATH));
    }

    #[test]
    fn test_slave_status_override() {
        let json = r#"{
            bus: { type: "modbus_rtu", device: "/dev/ttyUSB0", slave_status_topic: "bus/{slave}" },
            slaves: [ { id: 7, status_topic: "custom/seven" }, { id: 8 } ]
        }"#;
        let config = GatewayConfig::parse(json).unwrap();
        assert_eq!(config.slave_status_topic(7).as_deref(), Some("custom/seven"));
        assert_eq!(config.slave_status_topic(8).as_deref(), Some("bus/8"));
    }

    #[test]
    fn test_no_status_topic() {
        let config = GatewayConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.slave_status_topic(5), None);
    }

    #[test]
    fn test_rejects_slave_id_out_of_range() {
        let json = with_slaves("[ { id: 0 } ]");
        let result = GatewayConfig::parse(&json);
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));

        let json = with_slaves("[ { id: 255 } ]");
        assert!(GatewayConfig::parse(&json).is_err());
    }

    #[test]
    fn test_rejects_duplicate_slave() {
        let json = with_slaves("[ { id: 3 }, { id: 3 } ]");
        assert!(GatewayConfig::parse(&json).is_err());
    }

    #[test]
    fn test_rejects_unknown_cycle() {
        let json = with_slaves(r#"[ { id: 3, tags: [ { address: 1, update_cycle: 9 } ] } ]"#);
        let err = GatewayConfig::parse(&json).unwrap_err();
        assert!(err.to_string().contains("update_cycle 9"));
    }

    #[test]
    fn test_rejects_duplicate_address_in_group() {
        let json = with_slaves(
            r#"[ { id: 3, tags: [
                { address: 1, group: 2, update_cycle: 1 },
                { address: 1, group: 2, update_cycle: 1 },
            ] } ]"#,
        );
        assert!(GatewayConfig::parse(&json).is_err());
    }

    #[test]
    fn test_ungrouped_duplicates_allowed() {
        let json = with_slaves(
            r#"[ { id: 3, tags: [
                { address: 1, update_cycle: 1, topic: "a" },
                { address: 1, update_cycle: 1, topic: "b" },
            ] } ]"#,
        );
        assert!(GatewayConfig::parse(&json).is_ok());
    }

    #[test]
    fn test_oversized_group_is_only_warned() {
        let json = with_slaves(
            r#"[ { id: 3, tags: [
                { address: 0, group: 1, update_cycle: 1 },
                { address: 200, group: 1, update_cycle: 1 },
            ] } ]"#,
        );
        assert!(GatewayConfig::parse(&json).is_ok());
    }

    #[test]
    fn test_rejects_bad_cycles() {
        let json = r#"{
            bus: { type: "pl20", device: "/dev/ttyS0" },
            update_cycles: [ { id: 1, interval_secs: 0 } ]
        }"#;
        assert!(GatewayConfig::parse(json).is_err());

        let json = r#"{
            bus: { type: "pl20", device: "/dev/ttyS0" },
            update_cycles: [ { id: 1, interval_secs: 1 }, { id: 1, interval_secs: 2 } ]
        }"#;
        assert!(GatewayConfig::parse(json).is_err());
    }

    #[test]
    fn test_rejects_duplicate_topics() {
        let json = r#"{
            bus: { type: "modbus_rtu", device: "/dev/ttyUSB0" },
            write_tags: [
                { topic: "plant/setpoint", slave_id: 1, address: 4 },
                { topic: "plant/setpoint", slave_id: 2, address: 4 },
            ]
        }"#;
        assert!(GatewayConfig::parse(json).is_err());

        let json = r#"{
            bus: { type: "modbus_rtu", device: "/dev/ttyUSB0" },
            write_tags: [ { topic: "plant/cpu", slave_id: 1, address: 4 } ],
            cpu_temp: { topic: "plant/cpu" }
        }"#;
        assert!(GatewayConfig::parse(json).is_err());
    }

    #[test]
    fn test_rejects_empty_write_topic() {
        let json = r#"{
            bus: { type: "modbus_rtu", device: "/dev/ttyUSB0" },
            write_tags: [ { topic: "", slave_id: 1, address: 4 } ]
        }"#;
        assert!(GatewayConfig::parse(json).is_err());
    }

    #[test]
    fn test_rejects_unknown_bus_type() {
        let json = r#"{ bus: { type: "can", device: "can0" } }"#;
        assert!(GatewayConfig::parse(json).is_err());
    }
}
