//! Topology construction.
//!
//! Hosts get a static default route toward their switch and a probe
//! generator. Switches run HULA at priority 20 over a static fallback at
//! priority 0 that carries their connected routes. Every link gets its own
//! `/24` out of `10.0.0.0/8`.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::HulaConfig;
use crate::error::{Error, Result};
use crate::routing::{HulaRouting, StaticRouting};
use crate::types::{InterfaceId, Ipv4Mask, NodeId, Prefix};

use super::apps::{ConstantRateSource, ProbeGenerator, ProbeGeneratorConfig, TrafficConfig};
use super::network::{DataRate, LinkConfig, Network, NodeRole};

/// Priority of HULA in a switch routing list.
pub const HULA_PRIORITY: i16 = 20;
/// Priority of the static fallback.
pub const STATIC_PRIORITY: i16 = 0;

/// A node of a custom topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub role: NodeRole,
}

/// A link of a custom topology. Unset parameters use the simulation link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: String,
    pub b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<DataRate>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
}

/// Explicit list of nodes and links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

/// Topology to simulate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyPreset {
    /// `h0 - s0 - {s1, s2} - s3 - h1`: two equal-cost paths.
    #[default]
    Diamond,

    /// Every leaf connects to every spine.
    LeafSpine {
        #[serde(default = "default_two")]
        leaves: usize,
        #[serde(default = "default_two")]
        spines: usize,
        #[serde(default = "default_one")]
        hosts_per_leaf: usize,
    },

    /// k-ary fat tree: k pods of k/2 edge and k/2 aggregation switches,
    /// (k/2)^2 core switches.
    FatTree {
        #[serde(default = "default_k")]
        k: usize,
        #[serde(default = "default_one")]
        hosts_per_edge: usize,
    },

    Custom(TopologyConfig),
}

fn default_one() -> usize {
    1
}
fn default_two() -> usize {
    2
}
fn default_k() -> usize {
    4
}

impl TopologyPreset {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Diamond => Ok(()),
            Self::LeafSpine {
                leaves,
                spines,
                hosts_per_leaf,
            } => {
                if *leaves == 0 || *spines == 0 || *hosts_per_leaf == 0 {
                    return Err(Error::InvalidConfig("leaf-spine sizes must be positive".into()));
                }
                Ok(())
            }
            Self::FatTree { k, hosts_per_edge } => {
                if *k < 2 || k % 2 != 0 {
                    return Err(Error::InvalidConfig(format!("fat tree k must be even and >= 2, got {k}")));
                }
                if *hosts_per_edge == 0 {
                    return Err(Error::InvalidConfig("hosts_per_edge must be positive".into()));
                }
                Ok(())
            }
            Self::Custom(config) => {
                for link in &config.links {
                    for end in [&link.a, &link.b] {
                        if !config.nodes.iter().any(|n| &n.name == end) {
                            return Err(Error::InvalidConfig(format!("link references unknown node {end}")));
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Add this topology's nodes and links to `builder`.
    pub fn populate(&self, builder: &mut TopologyBuilder) -> Result<()> {
        match self {
            Self::Diamond => {
                let h0 = builder.add_host("h0");
                let s0 = builder.add_switch("s0", NodeRole::Edge);
                let s1 = builder.add_switch("s1", NodeRole::Core);
                let s2 = builder.add_switch("s2", NodeRole::Core);
                let s3 = builder.add_switch("s3", NodeRole::Edge);
                let h1 = builder.add_host("h1");

                builder.connect(s0, h0)?;
                builder.connect(s0, s1)?;
                builder.connect(s0, s2)?;
                builder.connect(s1, s3)?;
                builder.connect(s2, s3)?;
                builder.connect(s3, h1)?;
            }
            Self::LeafSpine {
                leaves,
                spines,
                hosts_per_leaf,
            } => {
                let spines: Vec<NodeId> = (0..*spines)
                    .map(|i| builder.add_switch(format!("spine{i}"), NodeRole::Core))
                    .collect();
                let mut host = 0;
                for l in 0..*leaves {
                    let leaf = builder.add_switch(format!("leaf{l}"), NodeRole::Edge);
                    for _ in 0..*hosts_per_leaf {
                        let h = builder.add_host(format!("h{host}"));
                        builder.connect(leaf, h)?;
                        host += 1;
                    }
                    for spine in &spines {
                        builder.connect(leaf, *spine)?;
                    }
                }
            }
            Self::FatTree { k, hosts_per_edge } => {
                let half = k / 2;
                let cores: Vec<NodeId> = (0..half * half)
                    .map(|i| builder.add_switch(format!("core{i}"), NodeRole::Core))
                    .collect();
                let mut host = 0;
                for pod in 0..*k {
                    let aggs: Vec<NodeId> = (0..half)
                        .map(|i| builder.add_switch(format!("agg{pod}_{i}"), NodeRole::Core))
                        .collect();
                    for e in 0..half {
                        let edge = builder.add_switch(format!("edge{pod}_{e}"), NodeRole::Edge);
                        for _ in 0..*hosts_per_edge {
                            let h = builder.add_host(format!("h{host}"));
                            builder.connect(edge, h)?;
                            host += 1;
                        }
                        for agg in &aggs {
                            builder.connect(*agg, edge)?;
                        }
                    }
                    // Aggregation switch i reaches core group i.
                    for (i, agg) in aggs.iter().enumerate() {
                        for core in &cores[i * half..(i + 1) * half] {
                            builder.connect(*core, *agg)?;
                        }
                    }
                }
            }
            Self::Custom(config) => {
                for node in &config.nodes {
                    builder.add_node(node.name.clone(), node.role);
                }
                for link in &config.links {
                    let a = builder.require(&link.a)?;
                    let b = builder.require(&link.b)?;
                    let mut params = builder.link.clone();
                    if let Some(rate) = link.rate {
                        params.rate = rate;
                    }
                    if let Some(delay) = link.delay {
                        params.delay = delay;
                    }
                    builder.connect_with(a, b, &params)?;
                }
            }
        }
        Ok(())
    }
}

/// Builds a [`Network`] with routing and applications installed.
#[derive(Debug)]
pub struct TopologyBuilder {
    network: Network,
    link: LinkConfig,
    hula: HulaConfig,
    generator: ProbeGeneratorConfig,
    traffic: Vec<TrafficConfig>,
    /// Index of the next link subnet.
    next_subnet: u32,
}

impl TopologyBuilder {
    pub fn new(link: LinkConfig) -> Self {
        Self {
            network: Network::new(),
            link,
            hula: HulaConfig::default(),
            generator: ProbeGeneratorConfig::default(),
            traffic: Vec::new(),
            next_subnet: 1,
        }
    }

    /// HULA configuration of every switch. Edge switches override `is_edge`.
    pub fn with_hula(mut self, hula: HulaConfig) -> Self {
        self.hula = hula;
        self
    }

    pub fn with_generator(mut self, generator: ProbeGeneratorConfig) -> Self {
        self.generator = generator;
        self
    }

    pub fn add_node(&mut self, name: impl Into<String>, role: NodeRole) -> NodeId {
        self.network.add_node(name, role)
    }

    pub fn add_host(&mut self, name: impl Into<String>) -> NodeId {
        self.add_node(name, NodeRole::Host)
    }

    pub fn add_switch(&mut self, name: impl Into<String>, role: NodeRole) -> NodeId {
        self.add_node(name, role)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.network.node_id(name)
    }

    fn require(&self, name: &str) -> Result<NodeId> {
        self.node_id(name)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown node {name}")))
    }

    /// Link two nodes with the default link parameters.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<(InterfaceId, InterfaceId)> {
        let link = self.link.clone();
        self.connect_with(a, b, &link)
    }

    /// Link two nodes; `a` gets `.1` and `b` gets `.2` of a fresh `/24`.
    pub fn connect_with(&mut self, a: NodeId, b: NodeId, link: &LinkConfig) -> Result<(InterfaceId, InterfaceId)> {
        let subnet = self.next_subnet;
        if subnet > 0xffff {
            return Err(Error::InvalidConfig("out of link subnets".into()));
        }
        self.next_subnet += 1;

        let [_, _, hi, lo] = subnet.to_be_bytes();
        let mask = Ipv4Mask::from_prefix_len(24);
        let a_address = Prefix::new(Ipv4Addr::new(10, hi, lo, 1), mask);
        let b_address = Prefix::new(Ipv4Addr::new(10, hi, lo, 2), mask);
        self.network.connect(a, b, link, a_address, b_address)
    }

    /// Queue a traffic source, resolved by node name at build time.
    pub fn add_traffic(&mut self, traffic: TrafficConfig) {
        self.traffic.push(traffic);
    }

    /// Install routing and applications, then initialize the network.
    pub fn build(mut self) -> Result<Network> {
        let ids: Vec<(NodeId, NodeRole)> = self.network.nodes().map(|n| (n.id(), n.role())).collect();

        for (id, role) in ids {
            match role {
                NodeRole::Host => self.install_host(id)?,
                NodeRole::Edge | NodeRole::Core => {
                    let config = HulaConfig {
                        is_edge: role == NodeRole::Edge,
                        ..self.hula.clone()
                    };
                    self.network
                        .install_routing(id, Box::new(HulaRouting::new(config)?), HULA_PRIORITY)?;
                    self.network
                        .install_routing(id, Box::new(StaticRouting::new()), STATIC_PRIORITY)?;
                }
            }
        }

        for traffic in std::mem::take(&mut self.traffic) {
            traffic.validate()?;
            let source = self.require(&traffic.source)?;
            let destination = self.require(&traffic.destination)?;
            let src_addr = self.host_address(source)?;
            let dst_addr = self.host_address(destination)?;
            self.network
                .add_source(ConstantRateSource::new(source, src_addr, dst_addr, traffic))?;
        }

        self.network.initialize()?;
        Ok(self.network)
    }

    fn host_address(&self, node: NodeId) -> Result<Ipv4Addr> {
        self.network
            .node(node)?
            .interfaces()
            .address_of(InterfaceId(1))
            .ok_or(Error::InterfaceNotFound(InterfaceId(1)))
    }

    fn install_host(&mut self, id: NodeId) -> Result<()> {
        let mut routing = StaticRouting::new();

        let node = self.network.node(id)?;
        if let Some((peer, peer_if)) = node.peer(InterfaceId(1)) {
            let gateway = self
                .network
                .node(peer)?
                .interfaces()
                .address_of(peer_if)
                .ok_or(Error::InterfaceNotFound(peer_if))?;
            routing.set_default_route(gateway, InterfaceId(1));
        } else {
            tracing::warn!(node = %node.name(), "Host without a link");
        }

        self.network.install_routing(id, Box::new(routing), STATIC_PRIORITY)?;
        if self.generator.enabled && node_has_interface(&self.network, id, self.generator.interface) {
            self.network
                .add_probe_generator(ProbeGenerator::new(id, self.generator.clone()))?;
        }
        Ok(())
    }
}

fn node_has_interface(network: &Network, node: NodeId, interface: InterfaceId) -> bool {
    network
        .node(node)
        .is_ok_and(|n| n.interfaces().get(interface).is_some())
}
