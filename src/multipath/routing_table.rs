//! Per-prefix best-path table.
//!
//! Holds one entry per destination prefix advertised by probes, plus the
//! prefixes attached to this node (which are never learned). Entries are
//! kept in insertion order so indexed access is stable.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::types::{InterfaceId, Ipv4Mask, NodeId, Prefix};

/// Best known path toward a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub prefix: Prefix,
    pub interface: InterfaceId,
    pub utilization: u64,
    /// Origination timestamp of the probe that last updated this entry (µs).
    pub timestamp: u64,
}

impl RoutingEntry {
    pub fn destination(&self) -> Ipv4Addr {
        self.prefix.address
    }

    pub fn mask(&self) -> Ipv4Mask {
        self.prefix.mask
    }

    /// HULA entries point at a neighbour on the link, never a gateway.
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::UNSPECIFIED
    }

    /// True when `addr` falls under this entry's prefix.
    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        self.prefix.contains(addr)
    }
}

/// Outcome of [`RoutingTable::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// First probe for this prefix.
    Inserted,
    /// Same interface as the current best; metric overwritten.
    Refreshed,
    /// Strictly better path on another interface.
    Switched { from: InterfaceId },
    /// Worse or equal path on another interface; entry untouched.
    Kept,
    /// Prefix is attached to this node.
    IgnoredLocal,
}

/// Routing table of one HULA node.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: Vec<RoutingEntry>,
    local: Vec<(InterfaceId, Prefix)>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prefix attached to `interface`.
    pub fn add_local_prefix(&mut self, interface: InterfaceId, prefix: Prefix) {
        if !self.local.contains(&(interface, prefix)) {
            self.local.push((interface, prefix));
        }
    }

    pub fn remove_local_prefix(&mut self, interface: InterfaceId, prefix: Prefix) {
        self.local.retain(|l| *l != (interface, prefix));
    }

    pub fn local_prefixes(&self) -> impl Iterator<Item = &(InterfaceId, Prefix)> {
        self.local.iter()
    }

    /// Interface whose attached prefix contains `addr`.
    pub fn local_interface_for(&self, addr: Ipv4Addr) -> Option<InterfaceId> {
        self.local
            .iter()
            .find(|(_, prefix)| prefix.contains(addr))
            .map(|(interface, _)| *interface)
    }

    /// Check if `addr` falls in a prefix attached to this node.
    pub fn is_local(&self, addr: Ipv4Addr) -> bool {
        self.local_interface_for(addr).is_some()
    }

    /// Merge a probe-learned path and return the utilization to advertise.
    ///
    /// A path on the current interface always overwrites the entry, so that
    /// congestion increases are learned too. A path on another interface
    /// only wins when strictly better.
    pub fn merge(
        &mut self,
        prefix: Prefix,
        interface: InterfaceId,
        utilization: u64,
        timestamp: u64,
    ) -> (u64, MergeAction) {
        if self.is_local(prefix.address) {
            return (0, MergeAction::IgnoredLocal);
        }

        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.matches(prefix.address))
        else {
            self.entries.push(RoutingEntry {
                prefix,
                interface,
                utilization,
                timestamp,
            });
            tracing::info!(destination = %prefix, interface = %interface, utilization, "New route");
            return (utilization, MergeAction::Inserted);
        };

        if entry.interface == interface {
            entry.utilization = utilization;
            entry.timestamp = timestamp;
            return (utilization, MergeAction::Refreshed);
        }

        if utilization < entry.utilization {
            let from = entry.interface;
            entry.utilization = utilization;
            entry.timestamp = timestamp;
            entry.interface = interface;
            tracing::debug!(
                destination = %prefix,
                from = %from,
                to = %interface,
                utilization,
                "Route switched"
            );
            return (utilization, MergeAction::Switched { from });
        }

        (entry.utilization, MergeAction::Kept)
    }

    /// The entry whose prefix contains `destination`.
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<&RoutingEntry> {
        self.entries.iter().find(|e| e.matches(destination))
    }

    /// Like [`lookup`](Self::lookup), restricted to entries on `interface`.
    pub fn lookup_on(&self, destination: Ipv4Addr, interface: InterfaceId) -> Option<&RoutingEntry> {
        self.entries
            .iter()
            .find(|e| e.interface == interface && e.matches(destination))
    }

    /// Entry at insertion position `index`.
    pub fn route(&self, index: usize) -> Option<&RoutingEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every learned entry. Local prefixes are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Render the table in `route -n` layout.
    pub fn print_table(&self, node: NodeId, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Node: {node}, HULA routing table")?;
        if !self.entries.is_empty() {
            writeln!(
                out,
                "Destination     Gateway         Genmask         Flags Util  Ref    Use Iface"
            )?;
            for entry in &self.entries {
                let flags = if entry.prefix.is_host() { "UH" } else { "U" };
                writeln!(
                    out,
                    "{:<16}{:<16}{:<16}{:<6}{:<6}{:<7}{:<4}{}",
                    entry.destination().to_string(),
                    entry.gateway().to_string(),
                    entry.mask().to_string(),
                    flags,
                    entry.utilization,
                    "-",
                    "-",
                    entry.interface
                )?;
            }
        }
        writeln!(out)
    }

    /// [`print_table`](Self::print_table) into a fresh string.
    pub fn to_table_string(&self, node: NodeId) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.print_table(node, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IF0: InterfaceId = InterfaceId(0);
    const IF1: InterfaceId = InterfaceId(1);
    const IF2: InterfaceId = InterfaceId(2);

    fn dst() -> Prefix {
        "10.1.6.2/32".parse().unwrap()
    }

    #[test]
    fn test_scenario_60_50_30_80() {
        let mut table = RoutingTable::new();

        assert_eq!(table.merge(dst(), IF0, 60, 1), (60, MergeAction::Inserted));
        assert_eq!(
            table.merge(dst(), IF1, 50, 2),
            (50, MergeAction::Switched { from: IF0 })
        );
        assert_eq!(
            table.merge(dst(), IF0, 30, 3),
            (30, MergeAction::Switched { from: IF1 })
        );
        assert_eq!(table.merge(dst(), IF1, 80, 4), (30, MergeAction::Kept));

        assert_eq!(table.len(), 1);
        let entry = table.route(0).unwrap();
        assert_eq!((entry.interface, entry.utilization, entry.timestamp), (IF0, 30, 3));
    }

    #[test]
    fn test_same_interface_overwrites_upwards() {
        let mut table = RoutingTable::new();
        table.merge(dst(), IF1, 10, 1);
        assert_eq!(table.merge(dst(), IF1, 90, 2), (90, MergeAction::Refreshed));
        assert_eq!(table.lookup(dst().address).unwrap().utilization, 90);
    }

    #[test]
    fn test_equal_utilization_does_not_switch() {
        let mut table = RoutingTable::new();
        table.merge(dst(), IF1, 40, 1);
        assert_eq!(table.merge(dst(), IF2, 40, 2), (40, MergeAction::Kept));
        assert_eq!(table.lookup(dst().address).unwrap().interface, IF1);
    }

    #[test]
    fn test_local_prefix_ignored() {
        let mut table = RoutingTable::new();
        table.add_local_prefix(IF1, "10.1.1.2/24".parse().unwrap());

        let (advertised, action) = table.merge("10.1.1.1/32".parse().unwrap(), IF2, 77, 1);
        assert_eq!((advertised, action), (0, MergeAction::IgnoredLocal));
        assert!(table.is_empty());
        assert_eq!(table.local_interface_for(Ipv4Addr::new(10, 1, 1, 9)), Some(IF1));

        table.remove_local_prefix(IF1, "10.1.1.2/24".parse().unwrap());
        assert!(!table.is_local(Ipv4Addr::new(10, 1, 1, 9)));
    }

    #[test]
    fn test_match_uses_entry_mask() {
        let mut table = RoutingTable::new();
        table.merge("10.1.6.1/24".parse().unwrap(), IF1, 20, 1);

        // A host inside the stored /24 hits the same entry.
        let (_, action) = table.merge("10.1.6.2/32".parse().unwrap(), IF2, 10, 2);
        assert_eq!(action, MergeAction::Switched { from: IF1 });
        assert_eq!(table.len(), 1);

        assert!(table.lookup(Ipv4Addr::new(10, 1, 6, 200)).is_some());
        assert!(table.lookup(Ipv4Addr::new(10, 1, 7, 1)).is_none());
    }

    #[test]
    fn test_lookup_on_interface() {
        let mut table = RoutingTable::new();
        table.merge(dst(), IF1, 20, 1);
        assert!(table.lookup_on(dst().address, IF1).is_some());
        assert!(table.lookup_on(dst().address, IF2).is_none());
    }

    #[test]
    fn test_route_index_and_clear() {
        let mut table = RoutingTable::new();
        table.merge("10.1.5.1/24".parse().unwrap(), IF1, 1, 1);
        table.merge("10.1.6.1/24".parse().unwrap(), IF2, 2, 1);
        assert_eq!(table.route(1).unwrap().interface, IF2);
        assert!(table.route(2).is_none());

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_print_table() {
        let mut table = RoutingTable::new();
        table.merge(dst(), IF1, 60, 1);
        let out = table.to_table_string(NodeId(4));

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Node: 4, HULA routing table");
        assert!(lines[1].starts_with("Destination     Gateway"));
        assert!(lines[2].starts_with("10.1.6.2        0.0.0.0         255.255.255.255 UH    60"));
        assert!(lines[2].ends_with('1'));
    }

    #[test]
    fn test_print_empty_table() {
        let table = RoutingTable::new();
        assert_eq!(table.to_table_string(NodeId(0)), "Node: 0, HULA routing table\n\n");
    }
}
