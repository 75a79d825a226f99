//! Priority-ordered composition of routing protocols.

use std::any::Any;
use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::Packet;
use crate::types::{InterfaceId, NodeId, Prefix};

use super::{ControlDatagram, Environment, InterfaceTable, LocalInterface, Route, RouteInput, RoutingProtocol};

/// Routing protocols consulted in priority order, first match wins.
#[derive(Debug, Default)]
pub struct RoutingList {
    /// Sorted by descending priority; equal priorities keep insertion order.
    protocols: Vec<(i16, Box<dyn RoutingProtocol>)>,
}

impl RoutingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a protocol. Higher priority is consulted first.
    pub fn add(&mut self, protocol: Box<dyn RoutingProtocol>, priority: i16) {
        let position = self
            .protocols
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(self.protocols.len());
        self.protocols.insert(position, (priority, protocol));
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }

    /// Protocol and priority at `index` in consultation order.
    pub fn protocol(&self, index: usize) -> Option<(&dyn RoutingProtocol, i16)> {
        self.protocols.get(index).map(|(p, r)| (r.as_ref(), *p))
    }

    /// First protocol of concrete type `T`.
    pub fn get<T: RoutingProtocol + 'static>(&self) -> Option<&T> {
        self.protocols
            .iter()
            .find_map(|(_, r)| r.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: RoutingProtocol + 'static>(&mut self) -> Option<&mut T> {
        self.protocols
            .iter_mut()
            .find_map(|(_, r)| r.as_any_mut().downcast_mut::<T>())
    }

    /// Control ports bound by the protocols of this list.
    pub fn control_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.protocols.iter().filter_map(|(_, r)| r.control_port())
    }

    /// Dispatch a control datagram to the protocol bound to `port`.
    ///
    /// Returns `false` when no protocol listens on the port.
    pub fn deliver_control(
        &mut self,
        port: u16,
        datagram: &ControlDatagram,
        env: &mut dyn Environment,
    ) -> Result<bool> {
        for (_, protocol) in &mut self.protocols {
            if protocol.control_port() == Some(port) {
                protocol.handle_read(datagram, env)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl RoutingProtocol for RoutingList {
    fn name(&self) -> &'static str {
        "list"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn initialize(&mut self, node: NodeId, interfaces: &InterfaceTable) -> Result<()> {
        for (_, protocol) in &mut self.protocols {
            protocol.initialize(node, interfaces)?;
        }
        Ok(())
    }

    fn route_output(
        &mut self,
        packet: &Packet,
        oif: Option<InterfaceId>,
        env: &mut dyn Environment,
    ) -> Result<Route> {
        for (_, protocol) in &mut self.protocols {
            match protocol.route_output(packet, oif, env) {
                Ok(route) => return Ok(route),
                Err(e) if e.is_no_route() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NoRouteToHost(packet.header.destination))
    }

    fn route_input(&mut self, packet: &Packet, iif: InterfaceId, env: &mut dyn Environment) -> RouteInput {
        for (_, protocol) in &mut self.protocols {
            let outcome = protocol.route_input(packet, iif, env);
            if outcome.is_handled() {
                return outcome;
            }
        }
        RouteInput::NotHandled
    }

    fn notify_interface_up(&mut self, interface: &LocalInterface) {
        for (_, protocol) in &mut self.protocols {
            protocol.notify_interface_up(interface);
        }
    }

    fn notify_interface_down(&mut self, interface: InterfaceId) {
        for (_, protocol) in &mut self.protocols {
            protocol.notify_interface_down(interface);
        }
    }

    fn notify_add_address(&mut self, interface: InterfaceId, prefix: Prefix) {
        for (_, protocol) in &mut self.protocols {
            protocol.notify_add_address(interface, prefix);
        }
    }

    fn notify_remove_address(&mut self, interface: InterfaceId, prefix: Prefix) {
        for (_, protocol) in &mut self.protocols {
            protocol.notify_remove_address(interface, prefix);
        }
    }

    fn print_table(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for (priority, protocol) in &self.protocols {
            writeln!(out, "Priority: {priority} Protocol: {}", protocol.name())?;
            protocol.print_table(out)?;
        }
        Ok(())
    }

    fn teardown(&mut self) {
        for (_, protocol) in &mut self.protocols {
            protocol.teardown();
        }
    }
}
