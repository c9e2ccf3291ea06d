//! Per-slave health: consecutive failures and online/offline state.

use std::collections::BTreeMap;

/// Health of one slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveStatus {
    pub id: u8,
    /// Operator label used in logs.
    pub name: Option<String>,
    pub online: bool,
    /// Consecutive failed transactions since the last success.
    pub failures: u32,
    pub status_topic: Option<String>,
    /// Field tags polled on this slave.
    pub read_tags: Vec<usize>,
    /// Write tags targeting this slave.
    pub write_tags: Vec<usize>,
}

impl SlaveStatus {
    fn new(id: u8, status_topic: Option<String>) -> Self {
        Self {
            id,
            name: None,
            online: false,
            failures: 0,
            status_topic,
            read_tags: Vec::new(),
            write_tags: Vec::new(),
        }
    }
}

/// Edge reported when a slave changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

impl Transition {
    pub fn online(self) -> bool {
        self == Transition::WentOnline
    }
}

/// All slaves on the bus, keyed by id. Every slave starts offline.
#[derive(Debug, Clone, Default)]
pub struct SlaveTable {
    slaves: BTreeMap<u8, SlaveStatus>,
    max_retries: u32,
}

impl SlaveTable {
    pub fn new(max_retries: u32) -> Self {
        Self {
            slaves: BTreeMap::new(),
            max_retries,
        }
    }

    /// Register a slave; an existing entry keeps its tag lists.
    pub fn register(&mut self, id: u8, status_topic: Option<String>) -> &mut SlaveStatus {
        self.slaves
            .entry(id)
            .or_insert_with(|| SlaveStatus::new(id, status_topic))
    }

    pub fn get(&self, id: u8) -> Option<&SlaveStatus> {
        self.slaves.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlaveStatus> {
        self.slaves.values()
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    pub fn online_ids(&self) -> Vec<u8> {
        self.slaves
            .values()
            .filter(|s| s.online)
            .map(|s| s.id)
            .collect()
    }

    /// Record a successful transaction.
    pub fn record_success(&mut self, id: u8) -> Option<Transition> {
        let slave = self.slaves.get_mut(&id)?;
        slave.failures = 0;
        if slave.online {
            return None;
        }
        slave.online = true;
        Some(Transition::WentOnline)
    }

    /// Record a failed transaction.
    pub fn record_failure(&mut self, id: u8) -> Option<Transition> {
        let max_retries = self.max_retries;
        let slave = self.slaves.get_mut(&id)?;
        slave.failures = slave.failures.saturating_add(1);
        if slave.failures < max_retries || !slave.online {
            return None;
        }
        slave.online = false;
        Some(Transition::WentOffline)
    }

    /// Force a slave offline, as on shutdown.
    pub fn set_offline(&mut self, id: u8) -> Option<Transition> {
        let slave = self.slaves.get_mut(&id)?;
        if !slave.online {
            return None;
        }
        slave.online = false;
        Some(Transition::WentOffline)
    }
}
