//! Static routes.
//!
//! Used on hosts (a default route toward their switch) and as the lowest
//! priority fallback on switches, where it carries the connected routes of
//! directly attached links.

use std::any::Any;
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::protocol::Packet;
use crate::types::{InterfaceId, Ipv4Mask, NodeId, Prefix};

use super::{Environment, InterfaceTable, LocalInterface, Route, RouteInput, RoutingProtocol};

/// A static route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticRoute {
    pub destination: Prefix,
    pub gateway: Ipv4Addr,
    pub interface: InterfaceId,
    /// Lower is preferred among equally specific routes.
    pub metric: u32,
}

impl StaticRoute {
    /// Create a new route through an interface.
    pub fn via_interface(destination: Prefix, interface: InterfaceId) -> Self {
        Self {
            destination,
            gateway: Ipv4Addr::UNSPECIFIED,
            interface,
            metric: 0,
        }
    }

    /// Create a new route via a gateway.
    pub fn via_gateway(destination: Prefix, gateway: Ipv4Addr, interface: InterfaceId) -> Self {
        Self {
            gateway,
            ..Self::via_interface(destination, interface)
        }
    }

    /// Set route metric.
    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metric = metric;
        self
    }

    pub fn is_default(&self) -> bool {
        self.destination.mask == Ipv4Mask::ANY
    }
}

/// Static routing protocol.
#[derive(Debug, Default)]
pub struct StaticRouting {
    node: NodeId,
    interfaces: InterfaceTable,
    routes: Vec<StaticRoute>,
}

impl StaticRouting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: StaticRoute) {
        tracing::debug!(
            node = %self.node,
            destination = %route.destination,
            interface = %route.interface,
            "Added route"
        );
        self.routes.push(route);
    }

    pub fn set_default_route(&mut self, gateway: Ipv4Addr, interface: InterfaceId) {
        self.routes.retain(|r| !r.is_default());
        self.add_route(StaticRoute::via_gateway(
            Prefix::new(Ipv4Addr::UNSPECIFIED, Ipv4Mask::ANY),
            gateway,
            interface,
        ));
    }

    pub fn routes(&self) -> &[StaticRoute] {
        &self.routes
    }

    fn add_connected(&mut self, interface: &LocalInterface) {
        if interface.is_loopback || interface.address.is_unspecified() {
            return;
        }
        let prefix = Prefix::new(interface.mask.apply(interface.address), interface.mask);
        let route = StaticRoute::via_interface(prefix, interface.id);
        if !self.routes.contains(&route) {
            self.add_route(route);
        }
    }

    /// Most specific route toward `destination`, lowest metric on ties.
    pub fn lookup(&self, destination: Ipv4Addr, oif: Option<InterfaceId>) -> Option<&StaticRoute> {
        self.routes
            .iter()
            .filter(|r| r.destination.contains(destination))
            .filter(|r| oif.map_or(true, |oif| r.interface == oif))
            .filter(|r| self.interfaces.get(r.interface).map_or(true, |i| i.is_up))
            .min_by_key(|r| (std::cmp::Reverse(r.destination.mask.prefix_len()), r.metric))
    }

    fn to_route(&self, destination: Ipv4Addr, route: &StaticRoute) -> Route {
        Route {
            destination,
            source: self
                .interfaces
                .address_of(route.interface)
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
            gateway: route.gateway,
            interface: route.interface,
        }
    }
}

impl RoutingProtocol for StaticRouting {
    fn name(&self) -> &'static str {
        "static"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn initialize(&mut self, node: NodeId, interfaces: &InterfaceTable) -> Result<()> {
        self.node = node;
        self.interfaces = interfaces.clone();
        for interface in interfaces.iter() {
            self.add_connected(interface);
        }
        Ok(())
    }

    fn route_output(&mut self, packet: &Packet, oif: Option<InterfaceId>, _env: &mut dyn Environment) -> Result<Route> {
        let destination = packet.header.destination;
        self.lookup(destination, oif)
            .map(|r| self.to_route(destination, r))
            .ok_or(Error::NoRouteToHost(destination))
    }

    fn route_input(&mut self, packet: &Packet, iif: InterfaceId, _env: &mut dyn Environment) -> RouteInput {
        let destination = packet.header.destination;

        if self.interfaces.is_own_address(destination) {
            return RouteInput::LocalDeliver(iif);
        }
        if packet.is_multicast() || packet.is_broadcast() {
            return RouteInput::NotHandled;
        }

        match self.lookup(destination, None) {
            Some(route) => RouteInput::Forward(self.to_route(destination, route)),
            None => RouteInput::NotHandled,
        }
    }

    fn notify_interface_up(&mut self, interface: &LocalInterface) {
        self.interfaces.insert(interface.clone());
        self.add_connected(interface);
    }

    fn notify_interface_down(&mut self, interface: InterfaceId) {
        if let Some(local) = self.interfaces.get_mut(interface) {
            local.is_up = false;
        }
    }

    fn notify_add_address(&mut self, interface: InterfaceId, prefix: Prefix) {
        if let Some(local) = self.interfaces.get_mut(interface) {
            local.address = prefix.address;
            local.mask = prefix.mask;
            let local = local.clone();
            self.add_connected(&local);
        }
    }

    fn notify_remove_address(&mut self, interface: InterfaceId, prefix: Prefix) {
        let network = Prefix::new(prefix.network(), prefix.mask);
        self.routes
            .retain(|r| !(r.interface == interface && r.destination == network));
    }

    fn print_table(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Node: {}, static routing table", self.node)?;
        if !self.routes.is_empty() {
            writeln!(out, "Destination     Gateway         Genmask         Flags Metric Iface")?;
            for route in &self.routes {
                let flags = if route.gateway.is_unspecified() { "U" } else { "UG" };
                writeln!(
                    out,
                    "{:<16}{:<16}{:<16}{:<6}{:<7}{}",
                    route.destination.address.to_string(),
                    route.gateway.to_string(),
                    route.destination.mask.to_string(),
                    flags,
                    route.metric,
                    route.interface
                )?;
            }
        }
        writeln!(out)
    }

    fn teardown(&mut self) {
        self.routes.clear();
    }
}
