//! Discrete-event network simulation.
//!
//! Drives the routing protocols the way a host stack would: point-to-point
//! links with queues, probe generators on hosts, constant-rate traffic and
//! packet sinks.

pub mod apps;
pub mod network;
pub mod scheduler;
pub mod topology;

pub use apps::{
    App, AppId, Arrival, ConstantRateSource, PacketSink, ProbeGenerator, ProbeGeneratorConfig, TrafficConfig,
};
pub use network::{DataRate, DeviceStats, LinkConfig, Network, NetworkStats, Node, NodeRole, NodeSummary};
pub use scheduler::{EventId, Simulator};
pub use topology::{LinkSpec, NodeSpec, TopologyBuilder, TopologyConfig, TopologyPreset};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

/// Simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Simulated time to run.
    #[serde(default = "default_duration", with = "humantime_serde")]
    pub duration: Duration,

    /// Topology to build.
    #[serde(default)]
    pub topology: TopologyPreset,

    /// Default link parameters.
    #[serde(default)]
    pub link: LinkConfig,

    /// Traffic sources.
    #[serde(default)]
    pub traffic: Vec<TrafficConfig>,
}

fn default_duration() -> Duration {
    Duration::from_millis(100)
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            topology: TopologyPreset::default(),
            link: LinkConfig::default(),
            traffic: Vec::new(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.duration.is_zero() {
            return Err(Error::InvalidConfig("simulation duration must be positive".into()));
        }
        self.link.validate()?;
        self.topology.validate()?;
        for traffic in &self.traffic {
            traffic.validate()?;
        }
        Ok(())
    }
}

/// Build and initialize the network described by `config`.
pub fn build_network(config: &Config) -> Result<Network> {
    config.validate()?;

    let sim = &config.simulation;
    let mut builder = TopologyBuilder::new(sim.link.clone())
        .with_hula(config.hula.clone())
        .with_generator(config.generator.clone());
    sim.topology.populate(&mut builder)?;
    for traffic in &sim.traffic {
        builder.add_traffic(traffic.clone());
    }
    builder.build()
}
