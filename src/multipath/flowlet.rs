//! Flowlet detection and path pinning.
//!
//! A flowlet is a burst of packets of one flow separated from the next burst
//! by an idle gap. Packets inside a burst stay on the interface the burst
//! started on, even if a better path shows up meanwhile; a new burst may
//! move. Since the gap exceeds the path delay difference, moving between
//! bursts cannot reorder packets.

use std::collections::HashMap;
use std::time::Duration;

use crate::types::{InterfaceId, SimTime};

/// Pin state of one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowletRecord {
    pub flow_hash: u32,
    /// Time of the most recent packet of the flow.
    pub last_seen: SimTime,
    pub pinned_interface: InterfaceId,
}

impl FlowletRecord {
    /// Whether a packet at `now` still belongs to the current flowlet.
    pub fn is_active(&self, now: SimTime, interval: Duration) -> bool {
        now.saturating_since(self.last_seen) <= interval
    }
}

/// Flow hash to pinned interface.
///
/// Records are never expired; a stale record simply stops pinning.
#[derive(Debug)]
pub struct FlowletTable {
    interval: Duration,
    flows: HashMap<u32, FlowletRecord>,
}

impl FlowletTable {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            flows: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Pick the output interface for a packet of `flow_hash` seen at `now`.
    ///
    /// Returns the pinned interface while the flowlet is active, otherwise
    /// `best`. Either way the record is refreshed with the choice.
    pub fn resolve(&mut self, flow_hash: u32, now: SimTime, best: InterfaceId) -> InterfaceId {
        let pinned = self
            .flows
            .get(&flow_hash)
            .filter(|r| r.is_active(now, self.interval))
            .map(|r| r.pinned_interface);

        let chosen = pinned.unwrap_or(best);

        if pinned.is_none() {
            tracing::debug!(
                flow_hash = format_args!("{flow_hash:#010x}"),
                interface = %chosen,
                "New flowlet"
            );
        }

        self.flows.insert(
            flow_hash,
            FlowletRecord {
                flow_hash,
                last_seen: now,
                pinned_interface: chosen,
            },
        );

        chosen
    }

    pub fn get(&self, flow_hash: u32) -> Option<&FlowletRecord> {
        self.flows.get(&flow_hash)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn clear(&mut self) {
        self.flows.clear();
    }
}
