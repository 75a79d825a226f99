//! Configuration management for HULA.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::multipath::{AdvertiseMode, DEFAULT_FLOWLET_INTERVAL, DEFAULT_TAU};
use crate::protocol::UtilizationByteOrder;
use crate::sim::{ProbeGeneratorConfig, SimulationConfig, TopologyPreset, TrafficConfig};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Routing protocol configuration.
    #[serde(default)]
    pub hula: HulaConfig,

    /// Probe generator configuration.
    #[serde(default)]
    pub generator: ProbeGeneratorConfig,

    /// Simulation configuration.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.hula.validate()?;
        self.generator.validate()?;
        self.simulation.validate()?;
        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("net", "hula", "hula").map_or_else(
            || PathBuf::from("hula.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            simulation: SimulationConfig {
                duration: Duration::from_millis(200),
                topology: TopologyPreset::Diamond,
                traffic: vec![TrafficConfig {
                    source: "h0".into(),
                    destination: "h1".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Selects when the loop-suppression heuristic applies.
///
/// When active, a probe for a destination that already has a route through
/// a different interface is dropped before any processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSuppression {
    /// Only on nodes with exactly this many interfaces, loopback included.
    InterfaceCount(usize),
    Always,
    Disabled,
}

impl LoopSuppression {
    /// Whether the heuristic applies to a node with `interface_count` interfaces.
    pub fn applies(self, interface_count: usize) -> bool {
        match self {
            Self::InterfaceCount(n) => n == interface_count,
            Self::Always => true,
            Self::Disabled => false,
        }
    }
}

impl Default for LoopSuppression {
    fn default() -> Self {
        Self::InterfaceCount(3)
    }
}

/// HULA routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HulaConfig {
    /// Edge switches do not re-flood probes for remote destinations.
    #[serde(default)]
    pub is_edge: bool,

    /// Advertise egress queue depth instead of the congestion estimate.
    #[serde(default, rename = "queue")]
    pub use_queue: bool,

    /// Utilization estimator decay constant.
    #[serde(default = "default_tau", with = "humantime_serde")]
    pub tau: Duration,

    /// Idle gap that ends a flowlet.
    #[serde(default = "default_flowlet_interval", with = "humantime_serde")]
    pub flowlet_interval: Duration,

    /// Loop-suppression heuristic.
    #[serde(default)]
    pub loop_suppression: LoopSuppression,

    /// Wire byte order of the probe utilization field.
    #[serde(default)]
    pub utilization_byte_order: UtilizationByteOrder,
}

fn default_tau() -> Duration {
    DEFAULT_TAU
}
fn default_flowlet_interval() -> Duration {
    DEFAULT_FLOWLET_INTERVAL
}

impl Default for HulaConfig {
    fn default() -> Self {
        Self {
            is_edge: false,
            use_queue: false,
            tau: default_tau(),
            flowlet_interval: default_flowlet_interval(),
            loop_suppression: LoopSuppression::default(),
            utilization_byte_order: UtilizationByteOrder::default(),
        }
    }
}

impl HulaConfig {
    /// Configuration for an edge switch.
    pub fn edge() -> Self {
        Self {
            is_edge: true,
            ..Default::default()
        }
    }

    pub fn advertise_mode(&self) -> AdvertiseMode {
        if self.use_queue {
            AdvertiseMode::Queue
        } else {
            AdvertiseMode::Congestion
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.tau.is_zero() {
            return Err(Error::InvalidConfig("tau must be positive".into()));
        }

        if self.flowlet_interval.is_zero() {
            return Err(Error::InvalidConfig("flowlet_interval must be positive".into()));
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
