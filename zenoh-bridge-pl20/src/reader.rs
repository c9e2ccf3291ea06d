//! Grouped register reads.
//!
//! Tags on one slave that share a group number are fetched with a single
//! read covering the lowest to the highest member address. Registers in the
//! gaps are read and discarded. Grouping is declared by the operator, never
//! inferred from addresses.

use std::collections::HashSet;

use plgate_bridge_framework::Broker;
use tracing::{trace, warn};

use crate::engine::Engine;
use crate::error::GatewayError;
use crate::tag::ReadStamp;
use crate::transport::RegisterTransport;

/// Largest span a single holding-register read may cover.
pub const MAX_READ_REGISTERS: u32 = 125;

/// Inclusive address range of one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpan {
    pub start: u16,
    pub end: u16,
}

impl RegisterSpan {
    /// Smallest span covering every address; `None` for no addresses.
    pub fn covering(addresses: impl IntoIterator<Item = u16>) -> Option<Self> {
        addresses.into_iter().fold(None, |span, address| {
            Some(match span {
                None => RegisterSpan {
                    start: address,
                    end: address,
                },
                Some(RegisterSpan { start, end }) => RegisterSpan {
                    start: start.min(address),
                    end: end.max(address),
                },
            })
        })
    }

    pub fn count(&self) -> u32 {
        u32::from(self.end - self.start) + 1
    }
}

/// Outcome of trying to satisfy a tag through its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRead {
    /// The tag's value is current for this firing and has been published.
    Done,
    /// The group read failed this firing; the tag was published under its
    /// noread policy.
    Failed,
    /// The tag is ungrouped or its group is too wide; read it on its own.
    Declined,
}

impl<T: RegisterTransport, B: Broker> Engine<T, B> {
    /// Read the group of `list[position]`, once per firing.
    ///
    /// `failed` collects the (slave, group) pairs whose read failed in this
    /// firing so the remaining members are not read again.
    pub(crate) async fn read_grouped(
        &mut self,
        list: &[usize],
        position: usize,
        stamp: ReadStamp,
        failed: &mut HashSet<(u8, i32)>,
    ) -> GroupRead {
        let Some(&index) = list.get(position) else {
            return GroupRead::Declined;
        };
        let Some(tag) = self.tags.get(index) else {
            return GroupRead::Declined;
        };
        if !tag.is_grouped() {
            return GroupRead::Declined;
        }
        let (slave, group, cycle) = (tag.slave_id, tag.group, tag.update_cycle);

        if tag.reference() == Some(stamp) {
            self.publish_field_tag(index).await;
            return GroupRead::Done;
        }
        if failed.contains(&(slave, group)) {
            self.publish_field_tag(index).await;
            return GroupRead::Failed;
        }

        // Members come from the slave's own tags that fire in this cycle.
        let members: Vec<usize> = self
            .slaves
            .get(slave)
            .map(|s| s.read_tags.as_slice())
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(|&i| {
                self.tags
                    .get(i)
                    .is_some_and(|t| t.group == group && t.update_cycle == cycle)
            })
            .collect();
        let Some(span) = RegisterSpan::covering(members.iter().map(|&i| self.tags[i].address))
        else {
            return GroupRead::Declined;
        };

        if span.count() > MAX_READ_REGISTERS {
            let error = GatewayError::Range {
                slave,
                group,
                count: span.count(),
                max: MAX_READ_REGISTERS,
            };
            warn!(error = %error, "Group read declined");
            return GroupRead::Declined;
        }

        trace!(slave, group, start = span.start, count = span.count(), "Group read");
        let result = self
            .transport
            .read_holding_registers(slave, span.start, span.count() as u16)
            .await;

        let outcome = match result {
            Ok(registers) => {
                for &member in &members {
                    let tag = &mut self.tags[member];
                    let offset = usize::from(tag.address - span.start);
                    match registers.get(offset) {
                        Some(&raw) => tag.set_raw_value(raw, stamp),
                        None => tag.noread_notify(),
                    }
                }
                self.record_slave_success(slave).await;
                GroupRead::Done
            }
            Err(e) => {
                warn!(
                    slave,
                    group,
                    start = span.start,
                    count = span.count(),
                    error = %e,
                    "Group read failed"
                );
                for &member in &members {
                    self.tags[member].noread_notify();
                }
                failed.insert((slave, group));
                self.record_slave_failure(slave).await;
                GroupRead::Failed
            }
        };

        self.inter_slave_delay().await;
        self.publish_field_tag(index).await;
        outcome
    }

    /// Read one tag with its own single-register request.
    pub(crate) async fn read_single(&mut self, index: usize, stamp: ReadStamp) {
        let Some(tag) = self.tags.get(index) else {
            return;
        };
        let (slave, address) = (tag.slave_id, tag.address);

        match self.transport.read_holding_registers(slave, address, 1).await {
            Ok(registers) if !registers.is_empty() => {
                self.tags[index].set_raw_value(registers[0], stamp);
                self.record_slave_success(slave).await;
            }
            Ok(_) => {
                warn!(slave, address, "Empty reply to register read");
                self.tags[index].noread_notify();
                self.record_slave_failure(slave).await;
            }
            Err(e) => {
                warn!(slave, address, error = %e, "Register read failed");
                self.tags[index].noread_notify();
                self.record_slave_failure(slave).await;
            }
        }

        self.publish_field_tag(index).await;
    }
}
