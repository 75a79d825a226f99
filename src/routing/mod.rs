//! IPv4 routing protocols and the seams they use to reach the node.
//!
//! A node routes through an ordered [`RoutingList`]: every protocol gets a
//! chance to resolve a datagram, highest priority first, and the first one
//! that handles it wins. Protocols never touch devices directly; they talk
//! to the node through the [`Environment`] trait.

mod hula;
mod list;
mod static_routing;

pub use hula::HulaRouting;
pub use list::RoutingList;
pub use static_routing::{StaticRoute, StaticRouting};

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::protocol::Packet;
use crate::types::{InterfaceId, Ipv4Mask, NodeId, Prefix, SimTime};

/// Node services available to a routing protocol.
pub trait Environment {
    /// Current simulation time.
    fn now(&self) -> SimTime;

    /// Broadcast a control datagram out of `interface`.
    fn broadcast(&mut self, interface: InterfaceId, payload: Bytes) -> Result<()>;

    /// Packets waiting in the egress queue of `interface`.
    fn queue_depth(&self, interface: InterfaceId) -> usize;
}

/// A received control-port datagram.
#[derive(Debug, Clone)]
pub struct ControlDatagram {
    pub source: SocketAddrV4,
    /// Interface the datagram arrived on, as reported by the receive path.
    pub incoming: Option<InterfaceId>,
    pub payload: Bytes,
}

/// Result of route resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    /// Local address of the output interface.
    pub source: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub interface: InterfaceId,
}

/// Outcome of routing a transiting datagram.
#[derive(Debug)]
pub enum RouteInput {
    /// Addressed to this node; deliver on the given interface.
    LocalDeliver(InterfaceId),
    /// Forward along the route.
    Forward(Route),
    /// Not handled; let the next protocol try.
    NotHandled,
    /// Handled by dropping the datagram.
    Rejected(Error),
}

impl RouteInput {
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::NotHandled)
    }
}

/// IPv4 interface of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub id: InterfaceId,
    pub name: String,
    pub address: Ipv4Addr,
    pub mask: Ipv4Mask,
    pub is_loopback: bool,
    pub is_up: bool,
    /// Whether datagrams arriving here may be forwarded.
    pub forwarding: bool,
}

impl LocalInterface {
    pub fn loopback() -> Self {
        Self {
            id: InterfaceId::LOOPBACK,
            name: "lo".into(),
            address: Ipv4Addr::LOCALHOST,
            mask: Ipv4Mask::from_prefix_len(8),
            is_loopback: true,
            is_up: true,
            forwarding: true,
        }
    }

    pub fn new(id: InterfaceId, name: impl Into<String>, address: Ipv4Addr, mask: Ipv4Mask) -> Self {
        Self {
            id,
            name: name.into(),
            address,
            mask,
            is_loopback: false,
            is_up: true,
            forwarding: true,
        }
    }

    pub fn prefix(&self) -> Prefix {
        Prefix::new(self.address, self.mask)
    }
}

/// Interfaces of a node keyed by index.
#[derive(Debug, Clone, Default)]
pub struct InterfaceTable {
    interfaces: BTreeMap<InterfaceId, LocalInterface>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding only the loopback.
    pub fn with_loopback() -> Self {
        let mut table = Self::new();
        table.insert(LocalInterface::loopback());
        table
    }

    pub fn insert(&mut self, interface: LocalInterface) {
        self.interfaces.insert(interface.id, interface);
    }

    pub fn remove(&mut self, id: InterfaceId) -> Option<LocalInterface> {
        self.interfaces.remove(&id)
    }

    pub fn get(&self, id: InterfaceId) -> Option<&LocalInterface> {
        self.interfaces.get(&id)
    }

    pub fn get_mut(&mut self, id: InterfaceId) -> Option<&mut LocalInterface> {
        self.interfaces.get_mut(&id)
    }

    /// Number of interfaces, loopback included.
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalInterface> {
        self.interfaces.values()
    }

    /// Non-loopback interfaces that are up.
    pub fn active(&self) -> impl Iterator<Item = &LocalInterface> {
        self.interfaces.values().filter(|i| !i.is_loopback && i.is_up)
    }

    /// Check if `addr` is one of this node's own addresses.
    pub fn is_own_address(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.values().any(|i| i.address == addr)
    }

    pub fn address_of(&self, id: InterfaceId) -> Option<Ipv4Addr> {
        self.get(id).map(|i| i.address)
    }
}

/// Routing protocol capability set.
pub trait RoutingProtocol: fmt::Debug {
    fn name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Bind to the node's interfaces. Called once before any traffic.
    fn initialize(&mut self, _node: NodeId, _interfaces: &InterfaceTable) -> Result<()> {
        Ok(())
    }

    /// UDP port this protocol receives control datagrams on, if any.
    fn control_port(&self) -> Option<u16> {
        None
    }

    /// Handle a datagram received on [`control_port`](Self::control_port).
    fn handle_read(&mut self, _datagram: &ControlDatagram, _env: &mut dyn Environment) -> Result<()> {
        Ok(())
    }

    /// Route a locally originated datagram, optionally restricted to `oif`.
    fn route_output(
        &mut self,
        packet: &Packet,
        oif: Option<InterfaceId>,
        env: &mut dyn Environment,
    ) -> Result<Route>;

    /// Route a datagram that arrived on `iif`.
    fn route_input(&mut self, packet: &Packet, iif: InterfaceId, env: &mut dyn Environment) -> RouteInput;

    fn notify_interface_up(&mut self, _interface: &LocalInterface) {}

    fn notify_interface_down(&mut self, _interface: InterfaceId) {}

    fn notify_add_address(&mut self, _interface: InterfaceId, _prefix: Prefix) {}

    fn notify_remove_address(&mut self, _interface: InterfaceId, _prefix: Prefix) {}

    fn print_table(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Release sockets and clear all state.
    fn teardown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_table() {
        let mut table = InterfaceTable::with_loopback();
        table.insert(LocalInterface::new(
            InterfaceId(1),
            "eth0",
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Mask::from_prefix_len(24),
        ));

        assert_eq!(table.len(), 2);
        assert_eq!(table.active().count(), 1);
        assert!(table.is_own_address(Ipv4Addr::new(10, 1, 1, 1)));
        assert!(table.is_own_address(Ipv4Addr::LOCALHOST));
        assert!(!table.is_own_address(Ipv4Addr::new(10, 1, 1, 2)));

        table.get_mut(InterfaceId(1)).unwrap().is_up = false;
        assert_eq!(table.active().count(), 0);
    }

    #[test]
    fn test_local_interface_prefix() {
        let iface = LocalInterface::new(
            InterfaceId(2),
            "eth1",
            Ipv4Addr::new(10, 1, 2, 1),
            Ipv4Mask::from_prefix_len(24),
        );
        assert_eq!(iface.prefix().to_string(), "10.1.2.1/24");
        assert!(!LocalInterface::loopback().prefix().contains(iface.address));
    }
}
