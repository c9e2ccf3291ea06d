//! Software tags keyed by topic.
//!
//! Unlike field tags these are not bound to a register: they are either fed
//! from a local source (CPU temperature) or from inbound broker messages.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::GatewayError;

/// Current value of a software tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TagValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

/// Action run when a subscribed software tag receives a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagCallback {
    /// Queue a register write for the write tag at this index.
    WriteRequest(usize),
}

/// Local source sampled into a software tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSource {
    /// Thermal zone file in millidegrees Celsius.
    CpuTemperature(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SoftwareTag {
    pub topic: String,
    pub value: TagValue,
    /// Seconds between samples of `source`.
    pub read_interval: i64,
    /// Seconds between publishes; 0 disables publishing.
    pub publish_interval: i64,
    pub next_read_time: i64,
    pub next_publish_time: i64,
    pub publish: bool,
    pub subscribe: bool,
    pub retain: bool,
    pub value_is_retained: bool,
    pub callback: Option<TagCallback>,
    pub source: Option<TagSource>,
}

impl SoftwareTag {
    /// A tag fed by inbound messages on `topic`.
    pub fn subscriber(topic: impl Into<String>, callback: TagCallback) -> Self {
        Self {
            topic: topic.into(),
            value: TagValue::Empty,
            read_interval: 0,
            publish_interval: 0,
            next_read_time: 0,
            next_publish_time: 0,
            publish: false,
            subscribe: true,
            retain: false,
            value_is_retained: false,
            callback: Some(callback),
            source: None,
        }
    }

    /// A tag sampled from `source` and published periodically.
    pub fn sampled(
        topic: impl Into<String>,
        source: TagSource,
        read_interval: i64,
        publish_interval: i64,
        now: i64,
    ) -> Self {
        Self {
            topic: topic.into(),
            value: TagValue::Empty,
            read_interval,
            publish_interval,
            next_read_time: now,
            next_publish_time: now + publish_interval,
            publish: publish_interval > 0,
            subscribe: false,
            retain: false,
            value_is_retained: false,
            callback: None,
            source: Some(source),
        }
    }

    /// Store an inbound payload and hand back the callback to run.
    pub fn set_text(&mut self, payload: &str, retained: bool) -> Option<TagCallback> {
        self.value = TagValue::Text(payload.to_string());
        self.value_is_retained = retained;
        self.callback
    }

    pub fn read_due(&self, now: i64) -> bool {
        self.source.is_some() && now >= self.next_read_time
    }

    pub fn publish_due(&self, now: i64) -> bool {
        self.publish && now >= self.next_publish_time
    }
}

/// Insertion-ordered registry of software tags.
#[derive(Debug, Clone, Default)]
pub struct TagStore {
    tags: Vec<SoftwareTag>,
    index: HashMap<String, usize>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag; topics must be unique.
    pub fn add(&mut self, tag: SoftwareTag) -> Result<usize, GatewayError> {
        if self.index.contains_key(&tag.topic) {
            return Err(GatewayError::DuplicateTopic(tag.topic));
        }
        let position = self.tags.len();
        self.index.insert(tag.topic.clone(), position);
        self.tags.push(tag);
        Ok(position)
    }

    pub fn get(&self, topic: &str) -> Option<&SoftwareTag> {
        self.index.get(topic).map(|&i| &self.tags[i])
    }

    pub fn get_mut(&mut self, topic: &str) -> Option<&mut SoftwareTag> {
        let position = *self.index.get(topic)?;
        self.tags.get_mut(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SoftwareTag> {
        self.tags.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SoftwareTag> {
        self.tags.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
