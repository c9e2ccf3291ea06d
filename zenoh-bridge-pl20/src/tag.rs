//! Field tags: one record per polled register, and the write tags fed from
//! inbound broker messages.

use serde::{Deserialize, Serialize};

use crate::config::{TagConfig, WriteTagConfig};

/// Identifies one cycle firing. Tags satisfied by a group read carry the
/// stamp of the firing that read them, so later members of the same group
/// are not read again in that firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadStamp(pub u64);

/// How a 16-bit register is interpreted and formatted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Unsigned 16-bit integer (default)
    #[default]
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned register published as a decimal number
    Float,
    /// Non-zero register is `1`, zero is `0`
    Bool,
}

impl DataType {
    /// Numeric value of a raw register before scaling.
    pub fn decode(self, raw: u16) -> f64 {
        match self {
            DataType::U16 | DataType::Float => f64::from(raw),
            DataType::I16 => f64::from(raw as i16),
            DataType::Bool => {
                if raw != 0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Render a (scaled) value for publishing.
    pub fn format(self, value: f64, decimals: Option<u8>) -> String {
        match (self, decimals) {
            (DataType::Bool, _) => {
                if value != 0.0 {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
            (_, Some(places)) => format!("{:.*}", usize::from(places), value),
            (DataType::Float, None) => format!("{}", value),
            (DataType::U16 | DataType::I16, None) => format!("{}", value.round() as i64),
        }
    }

    /// Parse an inbound payload into the raw register value to write.
    pub fn parse(self, payload: &str) -> Result<u16, String> {
        let text = payload.trim();
        if self == DataType::Bool {
            return match text.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => Ok(1),
                "0" | "false" | "off" => Ok(0),
                other => Err(format!("'{}' is not a boolean", other)),
            };
        }

        let value: f64 = text
            .parse()
            .map_err(|_| format!("'{}' is not a number", text))?;
        let value = value.round();
        match self {
            DataType::I16 => {
                if (f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&value) {
                    Ok(value as i16 as u16)
                } else {
                    Err(format!("{} is outside the i16 range", value))
                }
            }
            _ => {
                if (0.0..=f64::from(u16::MAX)).contains(&value) {
                    Ok(value as u16)
                } else {
                    Err(format!("{} is outside the u16 range", value))
                }
            }
        }
    }
}

/// What to do once a tag has failed more reads than it may ignore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoreadAction {
    /// Remove the tag's retained value from the broker.
    ClearRetained,
    /// Publish the configured fallback value.
    PublishNoreadValue,
    /// Leave the last published value standing.
    #[default]
    Ignore,
}

/// Broker operation a tag asks for when it is published.
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    Value(String),
    NoreadValue(String),
    ClearRetained,
    Nothing,
}

/// A value bound to one holding register on a slave.
#[derive(Debug, Clone)]
pub struct FieldTag {
    pub slave_id: u8,
    pub address: u16,
    /// Operator-assigned group; values below 1 are never grouped.
    pub group: i32,
    pub update_cycle: u32,
    pub data_type: DataType,
    pub scale: f64,
    pub offset: f64,
    pub decimals: Option<u8>,
    pub topic: String,
    pub retain: bool,
    pub noread_action: NoreadAction,
    pub noread_value: f64,
    /// Number of consecutive noreads tolerated before the action applies.
    pub noread_ignore: u32,
    raw_value: u16,
    reference: Option<ReadStamp>,
    noread_count: u32,
}

impl FieldTag {
    pub fn new(slave_id: u8, address: u16) -> Self {
        Self {
            slave_id,
            address,
            group: 0,
            update_cycle: 0,
            data_type: DataType::default(),
            scale: 1.0,
            offset: 0.0,
            decimals: None,
            topic: String::new(),
            retain: false,
            noread_action: NoreadAction::default(),
            noread_value: 0.0,
            noread_ignore: 0,
            raw_value: 0,
            reference: None,
            noread_count: 0,
        }
    }

    pub fn from_config(slave_id: u8, config: &TagConfig, retain_default: bool) -> Self {
        Self {
            group: config.group,
            update_cycle: config.update_cycle,
            data_type: config.data_type,
            scale: config.scale,
            offset: config.offset,
            decimals: config.decimals,
            topic: config.topic.clone(),
            retain: config.retain.unwrap_or(retain_default),
            noread_action: config.noread_action,
            noread_value: config.noread_value,
            noread_ignore: config.noread_ignore,
            ..Self::new(slave_id, config.address)
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.group >= 1
    }

    pub fn raw_value(&self) -> u16 {
        self.raw_value
    }

    pub fn reference(&self) -> Option<ReadStamp> {
        self.reference
    }

    pub fn noread_count(&self) -> u32 {
        self.noread_count
    }

    /// Store a freshly read register; clears the noread count.
    pub fn set_raw_value(&mut self, raw: u16, stamp: ReadStamp) {
        self.raw_value = raw;
        self.reference = Some(stamp);
        self.noread_count = 0;
    }

    /// Record a failed read. The value and reference stamp are left alone.
    pub fn noread_notify(&mut self) {
        self.noread_count = self.noread_count.saturating_add(1);
    }

    pub fn is_noread(&self) -> bool {
        self.noread_count > 0
    }

    pub fn noread_ignore_exceeded(&self) -> bool {
        self.noread_count > self.noread_ignore
    }

    pub fn scaled_value(&self) -> f64 {
        match self.data_type {
            DataType::Bool => self.data_type.decode(self.raw_value),
            _ => self.data_type.decode(self.raw_value) * self.scale + self.offset,
        }
    }

    pub fn formatted_value(&self) -> String {
        self.data_type.format(self.scaled_value(), self.decimals)
    }

    pub fn formatted_noread_value(&self) -> String {
        self.data_type.format(self.noread_value, self.decimals)
    }

    /// Decide what publishing this tag means right now.
    ///
    /// The noread action is not latched: it is returned on every call until
    /// a successful read resets the count.
    pub fn publication(&self) -> Publication {
        if !self.is_noread() {
            return Publication::Value(self.formatted_value());
        }
        if !self.noread_ignore_exceeded() {
            return Publication::Nothing;
        }
        match self.noread_action {
            NoreadAction::ClearRetained => Publication::ClearRetained,
            NoreadAction::PublishNoreadValue => {
                Publication::NoreadValue(self.formatted_noread_value())
            }
            NoreadAction::Ignore => Publication::Nothing,
        }
    }
}

/// A register written from an inbound broker message.
#[derive(Debug, Clone)]
pub struct WriteTag {
    pub slave_id: u8,
    pub address: u16,
    pub data_type: DataType,
    pub topic: String,
    /// Drop values replayed from the broker's retained store.
    pub ignore_retained: bool,
    pub raw_value: u16,
    pub write_pending: bool,
    pub value_is_retained: bool,
}

impl WriteTag {
    pub fn from_config(config: &WriteTagConfig) -> Self {
        Self {
            slave_id: config.slave_id,
            address: config.address,
            data_type: config.data_type,
            topic: config.topic.clone(),
            ignore_retained: config.ignore_retained,
            raw_value: 0,
            write_pending: false,
            value_is_retained: false,
        }
    }
}
