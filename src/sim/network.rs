//! Point-to-point network of routing nodes.
//!
//! Every link is a pair of devices with a FIFO egress queue, a fixed data
//! rate and a propagation delay. Nodes route through a [`RoutingList`];
//! control datagrams for a bound port are handed to the owning protocol,
//! everything else goes through `route_input`.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TransportError};
use crate::protocol::{Packet, Ports, CONTROL_PORT, IPPROTO_UDP};
use crate::routing::{
    ControlDatagram, Environment, HulaRouting, InterfaceTable, LocalInterface, RouteInput, RoutingList,
    RoutingProtocol, StaticRouting,
};
use crate::types::{InterfaceId, NodeId, Prefix, SimTime, TrafficStats};

use super::apps::{App, AppId, ConstantRateSource, PacketSink, ProbeGenerator};
use super::scheduler::Simulator;

// ============================================================================
// Link parameters
// ============================================================================

/// Link data rate in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate(u64);

impl DataRate {
    pub fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    pub fn from_kbps(kbps: u64) -> Self {
        Self(kbps.saturating_mul(1_000))
    }

    pub fn from_mbps(mbps: u64) -> Self {
        Self(mbps.saturating_mul(1_000_000))
    }

    pub fn from_gbps(gbps: u64) -> Self {
        Self(gbps.saturating_mul(1_000_000_000))
    }

    pub fn bps(self) -> u64 {
        self.0
    }

    /// Time to serialize `bytes` onto the link.
    pub fn transmission_time(self, bytes: usize) -> Duration {
        if self.0 == 0 {
            return Duration::MAX;
        }
        let nanos = bytes as u128 * 8 * 1_000_000_000 / u128::from(self.0);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u64, &str); 3] = [(1_000_000_000, "Gbps"), (1_000_000, "Mbps"), (1_000, "Kbps")];
        for (scale, unit) in UNITS {
            if self.0 >= scale && self.0 % scale == 0 {
                return write!(f, "{}{unit}", self.0 / scale);
            }
        }
        write!(f, "{}bps", self.0)
    }
}

impl FromStr for DataRate {
    type Err = Error;

    /// Accepts `1Gbps`, `100Mbps`, `64kbps`, `9600bps` or a bare number of bits.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());
        let (value, unit) = s.split_at(split);
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid data rate: {s}")))?;
        let scale = match unit.to_ascii_lowercase().as_str() {
            "" | "bps" => 1.0,
            "kbps" => 1e3,
            "mbps" => 1e6,
            "gbps" => 1e9,
            _ => return Err(Error::InvalidConfig(format!("unknown data rate unit: {unit}"))),
        };
        if !value.is_finite() || value < 0.0 {
            return Err(Error::InvalidConfig(format!("invalid data rate: {s}")));
        }
        Ok(Self((value * scale).round() as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DataRate> for String {
    fn from(rate: DataRate) -> Self {
        rate.to_string()
    }
}

/// Parameters of a point-to-point link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_rate")]
    pub rate: DataRate,

    /// One-way propagation delay.
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,

    /// Egress queue capacity in packets.
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
}

fn default_rate() -> DataRate {
    DataRate::from_gbps(1)
}
fn default_delay() -> Duration {
    Duration::from_micros(1)
}
fn default_queue_limit() -> usize {
    100
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            delay: default_delay(),
            queue_limit: default_queue_limit(),
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rate.bps() == 0 {
            return Err(Error::InvalidConfig("link rate must be positive".into()));
        }
        if self.queue_limit == 0 {
            return Err(Error::InvalidConfig("queue_limit must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Nodes and devices
// ============================================================================

/// Role of a node in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// End host with a default route.
    Host,
    /// Switch with attached hosts.
    Edge,
    /// Switch connecting other switches only.
    Core,
}

impl NodeRole {
    pub fn is_switch(self) -> bool {
        !matches!(self, Self::Host)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Edge => write!(f, "edge"),
            Self::Core => write!(f, "core"),
        }
    }
}

/// Counters of one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub drops: u64,
}

#[derive(Debug)]
struct Device {
    peer: (NodeId, InterfaceId),
    link: LinkConfig,
    queue: VecDeque<Packet>,
    in_flight: Option<Packet>,
    stats: DeviceStats,
}

impl Device {
    fn new(peer: (NodeId, InterfaceId), link: LinkConfig) -> Self {
        Self {
            peer,
            link,
            queue: VecDeque::new(),
            in_flight: None,
            stats: DeviceStats::default(),
        }
    }
}

/// A node of the simulated network.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    role: NodeRole,
    interfaces: InterfaceTable,
    devices: BTreeMap<InterfaceId, Device>,
    routing: RoutingList,
    sink: PacketSink,
    stats: TrafficStats,
}

impl Node {
    fn new(id: NodeId, name: String, role: NodeRole) -> Self {
        Self {
            id,
            name,
            role,
            interfaces: InterfaceTable::with_loopback(),
            devices: BTreeMap::new(),
            routing: RoutingList::new(),
            sink: PacketSink::new(),
            stats: TrafficStats::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    pub fn routing(&self) -> &RoutingList {
        &self.routing
    }

    pub fn routing_mut(&mut self) -> &mut RoutingList {
        &mut self.routing
    }

    /// HULA instance of this node, if any.
    pub fn hula(&self) -> Option<&HulaRouting> {
        self.routing.get::<HulaRouting>()
    }

    pub fn static_routing_mut(&mut self) -> Option<&mut StaticRouting> {
        self.routing.get_mut::<StaticRouting>()
    }

    pub fn sink(&self) -> &PacketSink {
        &self.sink
    }

    /// Node counters, with probes dropped inside the routing protocols.
    pub fn stats(&self) -> TrafficStats {
        let mut stats = self.stats;
        if let Some(hula) = self.hula() {
            stats.probes_dropped += hula.stats().probes_dropped;
        }
        stats
    }

    pub fn device_stats(&self, interface: InterfaceId) -> Option<DeviceStats> {
        self.devices.get(&interface).map(|d| d.stats)
    }

    /// Packets waiting behind the one being transmitted.
    pub fn queue_depth(&self, interface: InterfaceId) -> usize {
        self.devices.get(&interface).map_or(0, |d| d.queue.len())
    }

    /// Node and interface at the other end of `interface`.
    pub fn peer(&self, interface: InterfaceId) -> Option<(NodeId, InterfaceId)> {
        self.devices.get(&interface).map(|d| d.peer)
    }

    /// Interface leading to `peer`, if directly connected.
    pub fn interface_to(&self, peer: NodeId) -> Option<InterfaceId> {
        self.devices
            .iter()
            .find(|(_, d)| d.peer.0 == peer)
            .map(|(id, _)| *id)
    }
}

/// Snapshot of a node handed to its routing protocols.
///
/// Broadcasts are buffered and transmitted once the protocol returns.
struct NodeEnv {
    now: SimTime,
    depths: BTreeMap<InterfaceId, usize>,
    outbox: Vec<(InterfaceId, Bytes)>,
}

impl NodeEnv {
    fn new(now: SimTime, devices: &BTreeMap<InterfaceId, Device>) -> Self {
        Self {
            now,
            depths: devices.iter().map(|(id, d)| (*id, d.queue.len())).collect(),
            outbox: Vec::new(),
        }
    }
}

impl Environment for NodeEnv {
    fn now(&self) -> SimTime {
        self.now
    }

    fn broadcast(&mut self, interface: InterfaceId, payload: Bytes) -> Result<()> {
        if !self.depths.contains_key(&interface) {
            return Err(TransportError::NoDevice(interface).into());
        }
        self.outbox.push((interface, payload));
        Ok(())
    }

    fn queue_depth(&self, interface: InterfaceId) -> usize {
        self.depths.get(&interface).copied().unwrap_or(0)
    }
}

// ============================================================================
// Network
// ============================================================================

#[derive(Debug)]
enum NetEvent {
    Arrive {
        node: NodeId,
        interface: InterfaceId,
        packet: Packet,
    },
    TransmitComplete {
        node: NodeId,
        interface: InterfaceId,
    },
    AppTimer(AppId),
}

/// Summary of one node after a run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub role: NodeRole,
    pub traffic: TrafficStats,
    pub received: u64,
    pub received_bytes: u64,
}

/// Counters collected over a run.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub now: SimTime,
    pub events: u64,
    pub nodes: Vec<NodeSummary>,
    pub total: TrafficStats,
}

/// Simulated network.
#[derive(Debug, Default)]
pub struct Network {
    sim: Simulator<NetEvent>,
    nodes: Vec<Node>,
    apps: Vec<App>,
    links: usize,
    initialized: bool,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.sim.now()
    }

    pub fn add_node(&mut self, name: impl Into<String>, role: NodeRole) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(id, name.into(), role));
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(Error::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(Error::NodeNotFound(id))
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn link_count(&self) -> usize {
        self.links
    }

    pub fn app(&self, id: AppId) -> Option<&App> {
        self.apps.get(id.0)
    }

    /// Connect two nodes with a point-to-point link.
    ///
    /// Returns the new interface on `a` and on `b`.
    pub fn connect(
        &mut self,
        a: NodeId,
        b: NodeId,
        link: &LinkConfig,
        a_address: Prefix,
        b_address: Prefix,
    ) -> Result<(InterfaceId, InterfaceId)> {
        if a == b {
            return Err(Error::InvalidConfig(format!("node {a} cannot be linked to itself")));
        }
        link.validate()?;

        let a_if = self.next_interface(a)?;
        let b_if = self.next_interface(b)?;
        self.attach(a, a_if, a_address, Device::new((b, b_if), link.clone()))?;
        self.attach(b, b_if, b_address, Device::new((a, a_if), link.clone()))?;
        self.links += 1;

        tracing::debug!(a = %a, a_if = %a_if, b = %b, b_if = %b_if, rate = %link.rate, "Link added");
        Ok((a_if, b_if))
    }

    fn next_interface(&self, node: NodeId) -> Result<InterfaceId> {
        let node = self.node(node)?;
        Ok(InterfaceId(node.devices.len() as u32 + 1))
    }

    fn attach(&mut self, node: NodeId, id: InterfaceId, address: Prefix, device: Device) -> Result<()> {
        let initialized = self.initialized;
        let node = self.node_mut(node)?;
        let name = format!("{}-eth{}", node.name, id.0 - 1);
        let interface = LocalInterface::new(id, name, address.address, address.mask);

        node.devices.insert(id, device);
        node.interfaces.insert(interface.clone());
        if initialized {
            node.routing.notify_interface_up(&interface);
        }
        Ok(())
    }

    /// Install a routing protocol on `node`. Must happen before the first run.
    pub fn install_routing(&mut self, node: NodeId, protocol: Box<dyn RoutingProtocol>, priority: i16) -> Result<()> {
        if self.initialized {
            return Err(Error::InvalidConfig(
                "routing protocols must be installed before the network starts".into(),
            ));
        }
        self.node_mut(node)?.routing.add(protocol, priority);
        Ok(())
    }

    pub fn add_probe_generator(&mut self, generator: ProbeGenerator) -> Result<AppId> {
        self.add_app(App::ProbeGenerator(generator))
    }

    pub fn add_source(&mut self, source: ConstantRateSource) -> Result<AppId> {
        self.add_app(App::Source(source))
    }

    fn add_app(&mut self, app: App) -> Result<AppId> {
        self.node(app.node())?;
        let id = AppId(self.apps.len());
        self.apps.push(app);
        if self.initialized {
            self.start_app(id)?;
        }
        Ok(id)
    }

    fn start_app(&mut self, id: AppId) -> Result<()> {
        let now = self.sim.now();
        let Some(app) = self.apps.get_mut(id.0) else {
            return Ok(());
        };
        let timer = self.sim.schedule(app.start().max(now), NetEvent::AppTimer(id))?;
        app.set_timer(Some(timer));
        Ok(())
    }

    /// Bind every routing protocol and start the applications.
    ///
    /// Runs implicitly on the first [`run`](Self::run).
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        for node in &mut self.nodes {
            node.routing.initialize(node.id, &node.interfaces)?;

            let mut ports: Vec<u16> = node.routing.control_ports().collect();
            ports.sort_unstable();
            if let Some(port) = ports.windows(2).find(|w| w[0] == w[1]).map(|w| w[0]) {
                return Err(TransportError::BindFailed {
                    addr: format!("0.0.0.0:{port}"),
                    reason: format!("port bound twice on node {}", node.name),
                }
                .into());
            }
        }

        self.initialized = true;
        for id in 0..self.apps.len() {
            self.start_app(AppId(id))?;
        }

        tracing::info!(
            nodes = self.nodes.len(),
            links = self.links,
            apps = self.apps.len(),
            "Network initialized"
        );
        Ok(())
    }

    /// Run for `duration` of simulated time.
    ///
    /// Fatal errors abort the run; everything else is logged and counted.
    pub fn run(&mut self, duration: Duration) -> Result<NetworkStats> {
        self.initialize()?;

        let deadline = self.sim.now() + duration;
        while let Some((_, event)) = self.sim.pop_until(deadline) {
            self.handle(event)?;
        }
        self.sim.advance_to(deadline);

        tracing::debug!(now = %self.sim.now(), events = self.sim.executed(), "Run finished");
        Ok(self.stats())
    }

    /// Stop every application and release routing state.
    pub fn teardown(&mut self) {
        for app in &mut self.apps {
            if let Some(timer) = app.timer() {
                self.sim.cancel(timer);
            }
            app.set_timer(None);
        }
        for node in &mut self.nodes {
            node.routing.teardown();
            for device in node.devices.values_mut() {
                device.queue.clear();
                device.in_flight = None;
            }
        }
        self.sim.clear();
        self.initialized = false;
    }

    /// Bring an interface up or down and notify the node's protocols.
    pub fn set_interface_up(&mut self, node: NodeId, interface: InterfaceId, up: bool) -> Result<()> {
        let node = self.node_mut(node)?;
        let local = node
            .interfaces
            .get_mut(interface)
            .ok_or(Error::InterfaceNotFound(interface))?;
        if local.is_up == up {
            return Ok(());
        }
        local.is_up = up;
        let local = local.clone();

        if up {
            node.routing.notify_interface_up(&local);
        } else {
            node.routing.notify_interface_down(interface);
            if let Some(device) = node.devices.get_mut(&interface) {
                device.stats.drops += device.queue.len() as u64;
                device.queue.clear();
            }
        }
        tracing::info!(node = %node.name, interface = %interface, up, "Interface state changed");
        Ok(())
    }

    /// Originate `packet` at `node`.
    pub fn send_from(&mut self, node_id: NodeId, mut packet: Packet) -> Result<()> {
        let now = self.sim.now();
        let node = self.node_mut(node_id)?;
        let mut env = NodeEnv::new(now, &node.devices);

        let route = match node.routing.route_output(&packet, None, &mut env) {
            Ok(route) => route,
            Err(e) => {
                if e.is_no_route() {
                    node.stats.packets_unroutable += 1;
                }
                return Err(e);
            }
        };
        if packet.header.source.is_unspecified() {
            packet.header.source = route.source;
        }

        let outbox = env.outbox;
        self.flush(node_id, outbox)?;
        self.transmit(node_id, route.interface, packet)
    }

    /// Broadcast a control datagram out of `interface` of `node`.
    pub fn broadcast_from(&mut self, node_id: NodeId, interface: InterfaceId, payload: Bytes) -> Result<()> {
        let node = self.node_mut(node_id)?;
        let source = node
            .interfaces
            .address_of(interface)
            .ok_or(Error::InterfaceNotFound(interface))?;
        node.stats.probes_sent += 1;

        let packet = Packet::udp(
            source,
            Ipv4Addr::BROADCAST,
            Ports::new(CONTROL_PORT, CONTROL_PORT),
            payload,
        );
        self.transmit(node_id, interface, packet)
    }

    fn flush(&mut self, node: NodeId, outbox: Vec<(InterfaceId, Bytes)>) -> Result<()> {
        for (interface, payload) in outbox {
            self.broadcast_from(node, interface, payload)?;
        }
        Ok(())
    }

    fn handle(&mut self, event: NetEvent) -> Result<()> {
        match event {
            NetEvent::Arrive {
                node,
                interface,
                packet,
            } => self.receive(node, interface, packet),
            NetEvent::TransmitComplete { node, interface } => self.complete_transmission(node, interface),
            NetEvent::AppTimer(app) => self.fire_app(app),
        }
    }

    /// Queue `packet` on the egress device of `interface`.
    fn transmit(&mut self, node_id: NodeId, interface: InterfaceId, packet: Packet) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id.index())
            .ok_or(Error::NodeNotFound(node_id))?;
        let up = node.interfaces.get(interface).is_some_and(|i| i.is_up);
        let device = node
            .devices
            .get_mut(&interface)
            .ok_or(TransportError::NoDevice(interface))?;

        if !up {
            device.stats.drops += 1;
            return Ok(());
        }

        if device.in_flight.is_some() {
            if device.queue.len() >= device.link.queue_limit {
                device.stats.drops += 1;
                tracing::trace!(node = %node_id, interface = %interface, "Queue full, packet dropped");
            } else {
                device.queue.push_back(packet);
            }
            return Ok(());
        }

        let delay = device.link.rate.transmission_time(packet.size());
        device.in_flight = Some(packet);
        self.sim.schedule_in(
            delay,
            NetEvent::TransmitComplete {
                node: node_id,
                interface,
            },
        );
        Ok(())
    }

    fn complete_transmission(&mut self, node_id: NodeId, interface: InterfaceId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id.index())
            .ok_or(Error::NodeNotFound(node_id))?;
        let device = node
            .devices
            .get_mut(&interface)
            .ok_or(TransportError::NoDevice(interface))?;

        let Some(packet) = device.in_flight.take() else {
            return Ok(());
        };
        device.stats.tx_packets += 1;
        device.stats.tx_bytes += packet.size() as u64;

        let (peer, peer_interface) = device.peer;
        let propagation = device.link.delay;

        if let Some(next) = device.queue.pop_front() {
            let delay = device.link.rate.transmission_time(next.size());
            device.in_flight = Some(next);
            self.sim.schedule_in(
                delay,
                NetEvent::TransmitComplete {
                    node: node_id,
                    interface,
                },
            );
        }

        self.sim.schedule_in(
            propagation,
            NetEvent::Arrive {
                node: peer,
                interface: peer_interface,
                packet,
            },
        );
        Ok(())
    }

    fn receive(&mut self, node_id: NodeId, iif: InterfaceId, packet: Packet) -> Result<()> {
        let now = self.sim.now();
        let node = self
            .nodes
            .get_mut(node_id.index())
            .ok_or(Error::NodeNotFound(node_id))?;

        if let Some(device) = node.devices.get_mut(&iif) {
            device.stats.rx_packets += 1;
            device.stats.rx_bytes += packet.size() as u64;
        }
        if !node.interfaces.get(iif).is_some_and(|i| i.is_up) {
            return Ok(());
        }

        let destination = packet.header.destination;
        let mut env = NodeEnv::new(now, &node.devices);

        // Control datagrams go straight to the protocol bound to the port.
        let control = packet
            .ports
            .filter(|_| packet.header.protocol == IPPROTO_UDP)
            .filter(|_| packet.is_broadcast() || node.interfaces.is_own_address(destination))
            .filter(|ports| node.routing.control_ports().any(|p| p == ports.destination));

        if let Some(ports) = control {
            node.stats.probes_received += 1;
            let datagram = ControlDatagram {
                source: SocketAddrV4::new(packet.header.source, ports.source),
                incoming: Some(iif),
                payload: packet.payload,
            };
            if let Err(e) = node.routing.deliver_control(ports.destination, &datagram, &mut env) {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(node = %node.name, interface = %iif, error = %e, "Control datagram failed");
            }
            return self.flush(node_id, env.outbox);
        }

        if packet.is_broadcast() {
            tracing::trace!(node = %node.name, interface = %iif, "Broadcast not for this node");
            return Ok(());
        }

        let outcome = node.routing.route_input(&packet, iif, &mut env);
        let outbox = std::mem::take(&mut env.outbox);

        match outcome {
            RouteInput::LocalDeliver(interface) => {
                node.stats.packets_delivered += 1;
                node.sink.receive(&packet, interface, now);
                self.flush(node_id, outbox)
            }
            RouteInput::Forward(route) => {
                let mut packet = packet;
                if packet.header.ttl <= 1 {
                    node.stats.packets_unroutable += 1;
                    tracing::trace!(node = %node.name, destination = %destination, "TTL expired");
                    return self.flush(node_id, outbox);
                }
                packet.header.ttl -= 1;
                node.stats.packets_forwarded += 1;
                self.flush(node_id, outbox)?;
                self.transmit(node_id, route.interface, packet)
            }
            RouteInput::NotHandled => {
                node.stats.packets_unroutable += 1;
                tracing::trace!(node = %node.name, destination = %destination, "No route, packet dropped");
                self.flush(node_id, outbox)
            }
            RouteInput::Rejected(e) => {
                node.stats.packets_unroutable += 1;
                tracing::trace!(node = %node.name, destination = %destination, error = %e, "Packet rejected");
                self.flush(node_id, outbox)
            }
        }
    }

    fn fire_app(&mut self, id: AppId) -> Result<()> {
        enum Output {
            Probe(InterfaceId, Bytes),
            Data(Packet),
        }

        let now = self.sim.now();
        let Some(app) = self.apps.get_mut(id.0) else {
            return Ok(());
        };
        app.set_timer(None);
        let node_id = app.node();

        let (output, next) = match app {
            App::ProbeGenerator(generator) => {
                let node = self
                    .nodes
                    .get(node_id.index())
                    .ok_or(Error::NodeNotFound(node_id))?;
                let output = generator
                    .fire(now, &node.interfaces)
                    .map(|(interface, payload)| Output::Probe(interface, payload));
                (output, Some(now + generator.config().interval))
            }
            App::Source(source) => match source.fire(now) {
                Some(packet) => (Some(Output::Data(packet)), source.next_send(now)),
                None => (None, None),
            },
        };

        if let Some(at) = next {
            let timer = self.sim.schedule(at, NetEvent::AppTimer(id))?;
            if let Some(app) = self.apps.get_mut(id.0) {
                app.set_timer(Some(timer));
            }
        }

        match output {
            Some(Output::Probe(interface, payload)) => self.broadcast_from(node_id, interface, payload),
            Some(Output::Data(packet)) => match self.send_from(node_id, packet) {
                Err(e) if !e.is_fatal() => {
                    tracing::trace!(node = %node_id, error = %e, "Send failed");
                    Ok(())
                }
                result => result,
            },
            None => Ok(()),
        }
    }

    /// Counters of every node.
    pub fn stats(&self) -> NetworkStats {
        let mut total = TrafficStats::default();
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                let traffic = node.stats();
                total.add(&traffic);
                NodeSummary {
                    name: node.name.clone(),
                    role: node.role,
                    traffic,
                    received: node.sink.received(),
                    received_bytes: node.sink.bytes(),
                }
            })
            .collect();

        NetworkStats {
            now: self.sim.now(),
            events: self.sim.executed(),
            nodes,
            total,
        }
    }

    /// Print the routing tables of every switch.
    pub fn print_tables(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for node in self.nodes.iter().filter(|n| n.role.is_switch()) {
            writeln!(out, "== {} ({}) at {} ==", node.name, node.role, self.sim.now())?;
            node.routing.print_table(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProbeMessage;
    use crate::routing::StaticRoute;
    use crate::types::Ipv4Mask;

    fn prefix(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    /// Two hosts on one link, each with a connected route.
    fn pair(link: LinkConfig) -> (Network, NodeId, NodeId) {
        let mut net = Network::new();
        let a = net.add_node("a", NodeRole::Host);
        let b = net.add_node("b", NodeRole::Host);
        net.connect(a, b, &link, prefix("10.1.1.1/24"), prefix("10.1.1.2/24"))
            .unwrap();
        net.install_routing(a, Box::new(StaticRouting::new()), 0).unwrap();
        net.install_routing(b, Box::new(StaticRouting::new()), 0).unwrap();
        (net, a, b)
    }

    fn datagram(size: usize) -> Packet {
        Packet::udp(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(10, 1, 1, 2),
            Ports::new(1000, 9),
            Bytes::from(vec![0; size - 28]),
        )
    }

    #[test]
    fn test_data_rate_parse_and_display() {
        assert_eq!("1Gbps".parse::<DataRate>().unwrap(), DataRate::from_gbps(1));
        assert_eq!("100 Mbps".parse::<DataRate>().unwrap(), DataRate::from_mbps(100));
        assert_eq!("2.5gbps".parse::<DataRate>().unwrap(), DataRate::from_mbps(2500));
        assert_eq!("9600".parse::<DataRate>().unwrap(), DataRate::from_bps(9600));
        assert!("10 parsecs".parse::<DataRate>().is_err());
        assert!("fast".parse::<DataRate>().is_err());

        assert_eq!(DataRate::from_mbps(2500).to_string(), "2500Mbps");
        assert_eq!(DataRate::from_gbps(10).to_string(), "10Gbps");
        assert_eq!(DataRate::from_bps(1500).to_string(), "1500bps");
    }

    #[test]
    fn test_transmission_time() {
        let rate = DataRate::from_gbps(1);
        assert_eq!(rate.transmission_time(125), Duration::from_micros(1));
        assert_eq!(DataRate::from_mbps(8).transmission_time(1000), Duration::from_millis(1));
    }

    #[test]
    fn test_connect_assigns_interfaces() {
        let (net, a, b) = pair(LinkConfig::default());
        let a = net.node(a).unwrap();
        assert_eq!(a.interfaces().len(), 2);
        assert_eq!(a.interfaces().get(InterfaceId(1)).unwrap().name, "a-eth0");
        assert_eq!(a.peer(InterfaceId(1)), Some((b, InterfaceId(1))));
        assert_eq!(a.interface_to(b), Some(InterfaceId(1)));
        assert_eq!(net.link_count(), 1);
    }

    #[test]
    fn test_self_link_rejected() {
        let mut net = Network::new();
        let a = net.add_node("a", NodeRole::Host);
        assert!(net
            .connect(a, a, &LinkConfig::default(), prefix("10.0.0.1/24"), prefix("10.0.0.2/24"))
            .is_err());
    }

    #[test]
    fn test_delivery_timing() {
        let link = LinkConfig {
            rate: DataRate::from_mbps(8),
            delay: Duration::from_millis(2),
            queue_limit: 10,
        };
        let (mut net, a, b) = pair(link);
        net.initialize().unwrap();
        net.send_from(a, datagram(1000)).unwrap();

        // 1ms serialization + 2ms propagation.
        net.run(Duration::from_micros(2999)).unwrap();
        assert_eq!(net.node(b).unwrap().sink().received(), 0);

        net.run(Duration::from_micros(1)).unwrap();
        let b = net.node(b).unwrap();
        assert_eq!(b.sink().received(), 1);
        assert_eq!(b.stats().packets_delivered, 1);
        assert_eq!(b.device_stats(InterfaceId(1)).unwrap().rx_bytes, 1000);
    }

    #[test]
    fn test_queue_builds_and_overflows() {
        let link = LinkConfig {
            rate: DataRate::from_mbps(8),
            delay: Duration::ZERO,
            queue_limit: 2,
        };
        let (mut net, a, b) = pair(link);
        net.initialize().unwrap();
        for _ in 0..5 {
            net.send_from(a, datagram(1000)).unwrap();
        }

        // One in flight, two queued, two dropped.
        let node = net.node(a).unwrap();
        assert_eq!(node.queue_depth(InterfaceId(1)), 2);
        assert_eq!(node.device_stats(InterfaceId(1)).unwrap().drops, 2);

        net.run(Duration::from_millis(10)).unwrap();
        assert_eq!(net.node(b).unwrap().sink().received(), 3);
        assert_eq!(net.node(a).unwrap().queue_depth(InterfaceId(1)), 0);
    }

    #[test]
    fn test_unroutable_send() {
        let (mut net, a, _) = pair(LinkConfig::default());
        net.initialize().unwrap();
        let mut packet = datagram(100);
        packet.header.destination = Ipv4Addr::new(192, 168, 1, 1);

        let err = net.send_from(a, packet).unwrap_err();
        assert!(err.is_no_route());
        assert_eq!(net.node(a).unwrap().stats().packets_unroutable, 1);
    }

    #[test]
    fn test_broadcast_without_listener_is_dropped() {
        let (mut net, a, b) = pair(LinkConfig::default());
        net.initialize().unwrap();
        let probe = ProbeMessage::new(Ipv4Addr::new(10, 1, 1, 1), Ipv4Mask::from_prefix_len(24), 0, 0);
        net.broadcast_from(a, InterfaceId(1), Bytes::copy_from_slice(&probe.encode()))
            .unwrap();
        net.run(Duration::from_millis(1)).unwrap();

        let b = net.node(b).unwrap();
        assert_eq!(b.stats().probes_received, 0);
        assert_eq!(b.sink().received(), 0);
        assert_eq!(b.device_stats(InterfaceId(1)).unwrap().rx_packets, 1);
        assert_eq!(net.node(a).unwrap().stats().probes_sent, 1);
    }

    #[test]
    fn test_forwarding_decrements_ttl_and_counts() {
        let link = LinkConfig::default();
        let mut net = Network::new();
        let a = net.add_node("a", NodeRole::Host);
        let r = net.add_node("r", NodeRole::Core);
        let b = net.add_node("b", NodeRole::Host);
        net.connect(a, r, &link, prefix("10.1.1.1/24"), prefix("10.1.1.2/24"))
            .unwrap();
        net.connect(r, b, &link, prefix("10.1.2.1/24"), prefix("10.1.2.2/24"))
            .unwrap();

        let mut host_a = StaticRouting::new();
        host_a.set_default_route(Ipv4Addr::new(10, 1, 1, 2), InterfaceId(1));
        net.install_routing(a, Box::new(host_a), 0).unwrap();
        net.install_routing(r, Box::new(StaticRouting::new()), 0).unwrap();
        let mut host_b = StaticRouting::new();
        host_b.add_route(StaticRoute::via_gateway(
            prefix("0.0.0.0/0"),
            Ipv4Addr::new(10, 1, 2, 1),
            InterfaceId(1),
        ));
        net.install_routing(b, Box::new(host_b), 0).unwrap();
        net.initialize().unwrap();

        let packet = Packet::udp(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(10, 1, 2, 2),
            Ports::new(1000, 9),
            Bytes::from_static(b"ping"),
        );
        net.send_from(a, packet).unwrap();
        net.run(Duration::from_millis(1)).unwrap();

        assert_eq!(net.node(r).unwrap().stats().packets_forwarded, 1);
        assert_eq!(net.node(b).unwrap().sink().received(), 1);

        let stats = net.stats();
        assert_eq!(stats.total.packets_forwarded, 1);
        assert_eq!(stats.total.packets_delivered, 1);
        assert_eq!(stats.nodes.len(), 3);
    }

    #[test]
    fn test_interface_down_drops_traffic() {
        let (mut net, a, b) = pair(LinkConfig::default());
        net.initialize().unwrap();
        net.set_interface_up(a, InterfaceId(1), false).unwrap();

        // The connected route is skipped while the interface is down.
        assert!(net.send_from(a, datagram(100)).is_err());
        net.run(Duration::from_millis(1)).unwrap();
        assert_eq!(net.node(b).unwrap().sink().received(), 0);

        net.set_interface_up(a, InterfaceId(1), true).unwrap();
        net.send_from(a, datagram(100)).unwrap();
        net.run(Duration::from_millis(1)).unwrap();
        assert_eq!(net.node(b).unwrap().sink().received(), 1);
    }

    #[test]
    fn test_install_after_start_rejected() {
        let (mut net, a, _) = pair(LinkConfig::default());
        net.initialize().unwrap();
        assert!(net
            .install_routing(a, Box::new(StaticRouting::new()), 1)
            .is_err());
    }

    #[test]
    fn test_teardown_stops_everything() {
        let (mut net, a, _) = pair(LinkConfig::default());
        net.initialize().unwrap();
        net.send_from(a, datagram(100)).unwrap();
        net.teardown();

        let stats = net.run(Duration::from_millis(1)).unwrap();
        assert_eq!(stats.total.packets_delivered, 0);
    }
}
