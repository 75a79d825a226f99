//! HULA routing protocol.
//!
//! Probes flooded from every edge prefix carry the maximum utilization seen
//! along their path. Each switch keeps the least utilized next hop per
//! prefix and re-floods the (possibly improved) probe. Data packets follow
//! the best next hop at flowlet granularity.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use crate::config::HulaConfig;
use crate::error::{Error, Result, TransportError};
use crate::multipath::{AdvertiseMode, FlowletTable, RoutingTable, UtilizationEstimator};
use crate::protocol::{Packet, ProbeMessage, CONTROL_PORT, PROBE_SIZE};
use crate::types::{InterfaceId, NodeId, Prefix, TrafficStats};

use super::{ControlDatagram, Environment, InterfaceTable, LocalInterface, Route, RouteInput, RoutingProtocol};

/// HULA routing state of one node.
#[derive(Debug)]
pub struct HulaRouting {
    config: HulaConfig,
    node: NodeId,
    interfaces: InterfaceTable,
    table: RoutingTable,
    flowlets: FlowletTable,
    estimator: UtilizationEstimator,
    /// Per-interface sockets probes are re-flooded from.
    send_sockets: BTreeMap<InterfaceId, SocketAddrV4>,
    /// Whether the control port is bound.
    listening: bool,
    stats: TrafficStats,
}

impl HulaRouting {
    /// Create a HULA instance. Fails on an invalid configuration.
    pub fn new(config: HulaConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            node: NodeId(0),
            interfaces: InterfaceTable::new(),
            table: RoutingTable::new(),
            flowlets: FlowletTable::new(config.flowlet_interval),
            estimator: UtilizationEstimator::new(config.tau),
            send_sockets: BTreeMap::new(),
            listening: false,
            stats: TrafficStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &HulaConfig {
        &self.config
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn flowlets(&self) -> &FlowletTable {
        &self.flowlets
    }

    pub fn estimator(&self) -> &UtilizationEstimator {
        &self.estimator
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    /// Interfaces probes can be sent from.
    pub fn sending_interfaces(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.send_sockets.keys().copied()
    }

    fn open_send_socket(&mut self, interface: &LocalInterface) {
        if interface.is_loopback || interface.address.is_unspecified() {
            return;
        }
        let local = SocketAddrV4::new(interface.address, CONTROL_PORT);
        tracing::debug!(node = %self.node, interface = %interface.id, local = %local, "Adding send socket");
        self.send_sockets.insert(interface.id, local);
    }

    /// Process one probe that arrived on `incoming`.
    ///
    /// `sample_size` is the byte count fed to the estimator for the incoming
    /// interface.
    pub fn on_probe_received(
        &mut self,
        incoming: InterfaceId,
        probe: &ProbeMessage,
        sample_size: usize,
        env: &mut dyn Environment,
    ) -> Result<()> {
        self.stats.probes_received += 1;

        // Probes bouncing back toward where the route already points would
        // otherwise pull it away on the first round.
        if self.config.loop_suppression.applies(self.interfaces.len()) {
            if let Some(entry) = self.table.lookup(probe.destination) {
                if entry.interface != incoming {
                    tracing::trace!(
                        node = %self.node,
                        interface = %incoming,
                        destination = %probe.destination,
                        route = %entry.interface,
                        "Probe suppressed"
                    );
                    self.stats.probes_dropped += 1;
                    return Ok(());
                }
            }
        }

        let now = env.now();
        self.estimator.observe(incoming, sample_size, now);
        self.estimator.suppress(incoming, probe.destination);

        let local_utilization = match self.config.advertise_mode() {
            AdvertiseMode::Congestion => self.estimator.congestion_score(incoming),
            AdvertiseMode::Queue => env.queue_depth(incoming) as u64,
        };
        let candidate = probe.utilization.max(local_utilization);

        let (utilization, action) = self
            .table
            .merge(probe.prefix(), incoming, candidate, probe.timestamp);

        tracing::debug!(
            node = %self.node,
            interface = %incoming,
            destination = %probe.prefix(),
            candidate,
            utilization,
            action = ?action,
            "Probe merged"
        );

        if !self.is_probe_allowed(probe.destination, incoming) {
            return Ok(());
        }

        let payload = Bytes::copy_from_slice(
            &probe
                .with_utilization(utilization)
                .encode_with(self.config.utilization_byte_order),
        );

        let targets: Vec<InterfaceId> = self
            .send_sockets
            .keys()
            .copied()
            .filter(|j| *j != incoming)
            .filter(|j| !self.estimator.is_suppressed(*j, probe.destination))
            .collect();

        for interface in targets {
            match env.broadcast(interface, payload.clone()) {
                Ok(()) => self.stats.probes_sent += 1,
                Err(e) => {
                    tracing::warn!(node = %self.node, interface = %interface, error = %e, "Error while sending probe");
                }
            }
        }

        Ok(())
    }

    /// Whether a probe for `destination` that arrived on `incoming` may be
    /// flooded further.
    ///
    /// Probes for attached prefixes only leave when they came in through the
    /// interface owning the prefix. Remote prefixes are flooded unless this
    /// node is an edge switch.
    pub fn is_probe_allowed(&self, destination: Ipv4Addr, incoming: InterfaceId) -> bool {
        if self.table.is_local(destination) {
            self.table
                .local_prefixes()
                .any(|(interface, prefix)| *interface == incoming && prefix.contains(destination))
        } else {
            !self.config.is_edge
        }
    }

    /// Resolve the output interface of a data packet and account its bytes.
    fn lookup_route(
        &mut self,
        packet: &Packet,
        oif: Option<InterfaceId>,
        env: &mut dyn Environment,
    ) -> Option<Route> {
        let destination = packet.header.destination;
        let entry = match oif {
            Some(oif) => self.table.lookup_on(destination, oif),
            None => self.table.lookup(destination),
        }?;
        let best = entry.interface;
        let gateway = entry.gateway();

        let now = env.now();
        let flow_hash = packet.flow_id().flow_hash();
        let chosen = self.flowlets.resolve(flow_hash, now, best);
        self.estimator.observe(chosen, packet.size(), now);

        tracing::trace!(
            node = %self.node,
            destination = %destination,
            best = %best,
            chosen = %chosen,
            "Route resolved"
        );

        Some(Route {
            destination,
            source: self
                .interfaces
                .address_of(chosen)
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
            gateway,
            interface: chosen,
        })
    }
}

impl RoutingProtocol for HulaRouting {
    fn name(&self) -> &'static str {
        "hula"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn initialize(&mut self, node: NodeId, interfaces: &InterfaceTable) -> Result<()> {
        if self.listening {
            return Err(TransportError::BindFailed {
                addr: format!("0.0.0.0:{CONTROL_PORT}"),
                reason: "control port already bound".into(),
            }
            .into());
        }

        self.node = node;
        self.interfaces = interfaces.clone();

        for interface in interfaces.iter() {
            if interface.is_loopback {
                continue;
            }
            self.table.add_local_prefix(interface.id, interface.prefix());
            self.open_send_socket(interface);
        }

        if self.send_sockets.is_empty() {
            return Err(TransportError::BindFailed {
                addr: format!("0.0.0.0:{CONTROL_PORT}"),
                reason: "no interface with an address".into(),
            }
            .into());
        }

        self.listening = true;
        tracing::info!(
            node = %node,
            interfaces = self.send_sockets.len(),
            edge = self.config.is_edge,
            mode = ?self.config.advertise_mode(),
            "HULA initialized"
        );
        Ok(())
    }

    fn control_port(&self) -> Option<u16> {
        self.listening.then_some(CONTROL_PORT)
    }

    fn handle_read(&mut self, datagram: &ControlDatagram, env: &mut dyn Environment) -> Result<()> {
        let incoming = datagram.incoming.ok_or(Error::MissingInterfaceInfo)?;

        let probe = match ProbeMessage::decode_with(&datagram.payload, self.config.utilization_byte_order) {
            Ok(probe) => probe,
            Err(e) => {
                tracing::trace!(node = %self.node, from = %datagram.source, error = %e, "Dropping malformed probe");
                self.stats.probes_dropped += 1;
                return Ok(());
            }
        };

        tracing::debug!(
            node = %self.node,
            interface = %incoming,
            from = %datagram.source,
            probe = %probe,
            "Received probe"
        );

        // Only what follows the probe header counts as load.
        let sample_size = datagram.payload.len().saturating_sub(PROBE_SIZE);
        self.on_probe_received(incoming, &probe, sample_size, env)
    }

    fn route_output(
        &mut self,
        packet: &Packet,
        oif: Option<InterfaceId>,
        env: &mut dyn Environment,
    ) -> Result<Route> {
        let destination = packet.header.destination;
        if packet.is_multicast() {
            return Err(Error::NoRouteToHost(destination));
        }

        self.lookup_route(packet, oif, env)
            .ok_or(Error::NoRouteToHost(destination))
    }

    fn route_input(&mut self, packet: &Packet, iif: InterfaceId, env: &mut dyn Environment) -> RouteInput {
        let destination = packet.header.destination;

        if self.interfaces.is_own_address(destination) {
            return RouteInput::LocalDeliver(iif);
        }

        if packet.is_multicast() {
            return RouteInput::NotHandled;
        }

        if packet.is_broadcast() {
            tracing::trace!(node = %self.node, "Dropping broadcast not for this node");
            return RouteInput::Rejected(Error::NoRouteToHost(destination));
        }

        if !self.interfaces.get(iif).is_some_and(|i| i.forwarding) {
            tracing::trace!(node = %self.node, interface = %iif, "Forwarding disabled");
            return RouteInput::Rejected(Error::NoRouteToHost(destination));
        }

        match self.lookup_route(packet, None, env) {
            Some(route) => {
                self.stats.packets_forwarded += 1;
                RouteInput::Forward(route)
            }
            None => RouteInput::NotHandled,
        }
    }

    fn notify_interface_up(&mut self, interface: &LocalInterface) {
        self.interfaces.insert(interface.clone());
        if interface.is_loopback {
            return;
        }
        self.table.add_local_prefix(interface.id, interface.prefix());
        if self.listening {
            self.open_send_socket(interface);
        }
    }

    fn notify_interface_down(&mut self, interface: InterfaceId) {
        if let Some(local) = self.interfaces.get_mut(interface) {
            local.is_up = false;
        }
        if self.send_sockets.remove(&interface).is_some() {
            tracing::debug!(node = %self.node, interface = %interface, "Send socket closed");
        }
    }

    fn notify_add_address(&mut self, interface: InterfaceId, prefix: Prefix) {
        let Some(local) = self.interfaces.get_mut(interface) else {
            return;
        };
        local.address = prefix.address;
        local.mask = prefix.mask;
        let local = local.clone();

        if local.is_loopback {
            return;
        }
        self.table.add_local_prefix(interface, prefix);
        if self.listening && local.is_up {
            self.open_send_socket(&local);
        }
    }

    fn notify_remove_address(&mut self, interface: InterfaceId, prefix: Prefix) {
        self.table.remove_local_prefix(interface, prefix);
        if self
            .send_sockets
            .get(&interface)
            .is_some_and(|s| *s.ip() == prefix.address)
        {
            self.send_sockets.remove(&interface);
        }
    }

    fn print_table(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.table.print_table(self.node, out)
    }

    fn teardown(&mut self) {
        self.listening = false;
        self.send_sockets.clear();
        self.table.clear();
        self.flowlets.clear();
        self.estimator.clear();
        tracing::debug!(node = %self.node, "HULA torn down");
    }
}
