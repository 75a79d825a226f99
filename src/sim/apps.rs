//! Applications running on simulated hosts.
//!
//! Applications never touch the network directly. On every timer they
//! return what should be sent, and the network transmits it.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{Packet, Ports, ProbeMessage};
use crate::routing::InterfaceTable;
use crate::types::{InterfaceId, NodeId, Prefix, SimTime};

use super::network::DataRate;
use super::scheduler::EventId;

/// Index of an application in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppId(pub usize);

// ============================================================================
// Probe generator
// ============================================================================

/// Probe generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeGeneratorConfig {
    /// Install a generator on every host.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Time between probes.
    #[serde(default = "default_probe_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Time of the first probe.
    #[serde(default, with = "humantime_serde")]
    pub start: Duration,

    /// Interface probes are broadcast on; its prefix is advertised.
    #[serde(default = "default_probe_interface")]
    pub interface: InterfaceId,
}

fn default_enabled() -> bool {
    true
}
fn default_probe_interval() -> Duration {
    Duration::from_micros(200)
}
fn default_probe_interface() -> InterfaceId {
    InterfaceId(1)
}

impl Default for ProbeGeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval: default_probe_interval(),
            start: Duration::ZERO,
            interface: default_probe_interface(),
        }
    }
}

impl ProbeGeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("probe interval must be positive".into()));
        }
        if self.interface.is_loopback() {
            return Err(Error::InvalidConfig("probes cannot be sent on the loopback".into()));
        }
        Ok(())
    }
}

/// Periodically originates probes for a host prefix.
#[derive(Debug)]
pub struct ProbeGenerator {
    node: NodeId,
    config: ProbeGeneratorConfig,
    /// Advertised prefix; the interface prefix when unset.
    prefix: Option<Prefix>,
    timer: Option<EventId>,
    sent: u64,
}

impl ProbeGenerator {
    pub fn new(node: NodeId, config: ProbeGeneratorConfig) -> Self {
        Self {
            node,
            config,
            prefix: None,
            timer: None,
            sent: 0,
        }
    }

    /// Advertise `prefix` instead of the interface prefix.
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn config(&self) -> &ProbeGeneratorConfig {
        &self.config
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Build the next probe. `None` if the interface does not exist.
    pub fn fire(&mut self, now: SimTime, interfaces: &InterfaceTable) -> Option<(InterfaceId, Bytes)> {
        let interface = self.config.interface;
        let Some(prefix) = self
            .prefix
            .or_else(|| interfaces.get(interface).map(|i| i.prefix()))
        else {
            tracing::warn!(node = %self.node, interface = %interface, "Probe interface missing");
            return None;
        };

        let probe = ProbeMessage::originate(prefix, now);
        self.sent += 1;
        tracing::trace!(node = %self.node, probe = %probe, "Probe generated");

        Some((interface, Bytes::copy_from_slice(&probe.encode())))
    }
}

// ============================================================================
// Traffic source
// ============================================================================

/// Traffic source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// Sending node name.
    pub source: String,

    /// Receiving node name.
    pub destination: String,

    /// Destination UDP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// UDP payload size in bytes.
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,

    /// Sending rate.
    #[serde(default = "default_rate")]
    pub rate: DataRate,

    /// Number of distinct flows (source ports) packets rotate through.
    #[serde(default = "default_flows")]
    pub flows: u16,

    #[serde(default = "default_start", with = "humantime_serde")]
    pub start: Duration,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub stop: Option<Duration>,

    /// Length of a burst; sends continuously when unset.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub on_time: Option<Duration>,

    /// Silence between bursts.
    #[serde(default, with = "humantime_serde")]
    pub off_time: Duration,

    /// Inter-departure process.
    #[serde(default)]
    pub arrival: Arrival,

    /// Seed of the Poisson process.
    #[serde(default)]
    pub seed: u64,
}

/// Spacing of datagrams of a traffic source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arrival {
    /// Evenly spaced at the configured rate.
    #[default]
    Constant,
    /// Exponentially distributed gaps averaging the configured rate.
    Poisson,
}

fn default_port() -> u16 {
    9
}
fn default_packet_size() -> usize {
    512
}
fn default_rate() -> DataRate {
    DataRate::from_mbps(100)
}
fn default_flows() -> u16 {
    1
}
fn default_start() -> Duration {
    Duration::from_millis(1)
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            destination: String::new(),
            port: default_port(),
            packet_size: default_packet_size(),
            rate: default_rate(),
            flows: default_flows(),
            start: default_start(),
            stop: None,
            on_time: None,
            off_time: Duration::ZERO,
            arrival: Arrival::Constant,
            seed: 0,
        }
    }
}

impl TrafficConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() || self.destination.is_empty() {
            return Err(Error::InvalidConfig("traffic needs a source and a destination".into()));
        }
        if self.packet_size == 0 {
            return Err(Error::InvalidConfig("packet_size must be positive".into()));
        }
        if self.rate.bps() == 0 {
            return Err(Error::InvalidConfig("rate must be positive".into()));
        }
        if self.flows == 0 {
            return Err(Error::InvalidConfig("flows must be positive".into()));
        }
        if self.on_time.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidConfig("on_time must be positive".into()));
        }
        if let Some(stop) = self.stop {
            if stop <= self.start {
                return Err(Error::InvalidConfig("stop must be after start".into()));
            }
        }
        Ok(())
    }
}

/// First source port used by traffic sources.
pub const EPHEMERAL_PORT_BASE: u16 = 49153;

/// Sends fixed-size UDP datagrams at a constant average rate, optionally in
/// bursts.
#[derive(Debug)]
pub struct ConstantRateSource {
    node: NodeId,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    config: TrafficConfig,
    rng: StdRng,
    burst_start: SimTime,
    timer: Option<EventId>,
    sent: u64,
    sent_bytes: u64,
}

impl ConstantRateSource {
    pub fn new(node: NodeId, source: Ipv4Addr, destination: Ipv4Addr, config: TrafficConfig) -> Self {
        Self {
            node,
            source,
            destination,
            burst_start: SimTime::ZERO + config.start,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            timer: None,
            sent: 0,
            sent_bytes: 0,
        }
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    fn is_stopped(&self, at: SimTime) -> bool {
        self.config
            .stop
            .is_some_and(|stop| at >= SimTime::ZERO + stop)
    }

    /// Build the next datagram, or `None` once stopped.
    pub fn fire(&mut self, now: SimTime) -> Option<Packet> {
        if self.is_stopped(now) {
            return None;
        }

        let flow = (self.sent % u64::from(self.config.flows)) as u16;
        let ports = Ports::new(EPHEMERAL_PORT_BASE.wrapping_add(flow), self.config.port);
        let packet = Packet::udp(
            self.source,
            self.destination,
            ports,
            Bytes::from(vec![0u8; self.config.packet_size]),
        );

        self.sent += 1;
        self.sent_bytes += packet.size() as u64;
        Some(packet)
    }

    /// Time of the next datagram after one was sent at `now`.
    pub fn next_send(&mut self, now: SimTime) -> Option<SimTime> {
        let size = crate::protocol::IPV4_HEADER_SIZE + crate::protocol::UDP_HEADER_SIZE + self.config.packet_size;
        let mean = self.config.rate.transmission_time(size);
        let gap = match self.config.arrival {
            Arrival::Constant => mean,
            Arrival::Poisson => {
                let u: f64 = self.rng.gen();
                mean.mul_f64(-(1.0 - u).ln())
            }
        };
        let mut next = now + gap;

        if let Some(on_time) = self.config.on_time {
            if next.saturating_since(self.burst_start) >= on_time {
                next += self.config.off_time;
                self.burst_start = next;
                tracing::trace!(node = %self.node, next = %next, "Burst finished");
            }
        }

        (!self.is_stopped(next)).then_some(next)
    }
}

// ============================================================================
// Packet sink
// ============================================================================

/// Counts datagrams delivered to a node.
#[derive(Debug, Clone, Default)]
pub struct PacketSink {
    received: u64,
    bytes: u64,
    per_interface: BTreeMap<InterfaceId, u64>,
    per_port: BTreeMap<u16, u64>,
    first_arrival: Option<SimTime>,
    last_arrival: Option<SimTime>,
}

impl PacketSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, packet: &Packet, interface: InterfaceId, now: SimTime) {
        self.received += 1;
        self.bytes += packet.size() as u64;
        *self.per_interface.entry(interface).or_default() += 1;
        if let Some(ports) = packet.ports {
            *self.per_port.entry(ports.destination).or_default() += 1;
        }
        self.first_arrival.get_or_insert(now);
        self.last_arrival = Some(now);
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn received_on(&self, interface: InterfaceId) -> u64 {
        self.per_interface.get(&interface).copied().unwrap_or(0)
    }

    pub fn received_on_port(&self, port: u16) -> u64 {
        self.per_port.get(&port).copied().unwrap_or(0)
    }

    /// Average goodput between the first and last arrival.
    pub fn throughput_bps(&self) -> f64 {
        match (self.first_arrival, self.last_arrival) {
            (Some(first), Some(last)) if last > first => {
                self.bytes as f64 * 8.0 / last.saturating_since(first).as_secs_f64()
            }
            _ => 0.0,
        }
    }
}

// ============================================================================
// Application slot
// ============================================================================

/// An application installed on a node.
#[derive(Debug)]
pub enum App {
    ProbeGenerator(ProbeGenerator),
    Source(ConstantRateSource),
}

impl App {
    pub fn node(&self) -> NodeId {
        match self {
            Self::ProbeGenerator(g) => g.node,
            Self::Source(s) => s.node,
        }
    }

    /// Time of the first timer.
    pub fn start(&self) -> SimTime {
        match self {
            Self::ProbeGenerator(g) => SimTime::ZERO + g.config.start,
            Self::Source(s) => SimTime::ZERO + s.config.start,
        }
    }

    pub(crate) fn timer(&self) -> Option<EventId> {
        match self {
            Self::ProbeGenerator(g) => g.timer,
            Self::Source(s) => s.timer,
        }
    }

    pub(crate) fn set_timer(&mut self, timer: Option<EventId>) {
        match self {
            Self::ProbeGenerator(g) => g.timer = timer,
            Self::Source(s) => s.timer = timer,
        }
    }
}
