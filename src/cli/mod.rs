//! Command line interface for HULA.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// HULA - congestion-aware load-balancing simulator
#[derive(Parser, Debug)]
#[command(
    name = "hula",
    author,
    version,
    about = "Congestion-aware, flowlet-granular load balancing for data-center fabrics",
    long_about = r#"
Simulates HULA routing over a point-to-point fabric:

  - Hosts flood probes advertising their prefix
  - Switches keep the least utilized next hop per prefix
  - Data follows the best next hop, one flowlet at a time

QUICK START:
  hula config > hula.toml
  hula run --config hula.toml
  hula table --topology fat-tree --k 4 --node edge0_0
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulation and print traffic counters
    Run(RunArgs),

    /// Run a simulation and print the switch routing tables
    Table(TableArgs),

    /// Print or validate configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ScenarioArgs {
    /// Simulated time to run (e.g. 200ms)
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Topology preset
    #[arg(short, long)]
    pub topology: Option<TopologyKind>,

    /// Ports per switch for the fat tree
    #[arg(long, default_value = "4")]
    pub k: usize,

    /// Leaves, spines and hosts per leaf for leaf-spine
    #[arg(long, num_args = 3, value_names = ["LEAVES", "SPINES", "HOSTS"])]
    pub leaf_spine: Option<Vec<usize>>,

    /// Advertise egress queue depth instead of the congestion estimate
    #[arg(long)]
    pub queue: bool,

    /// Disable the probe generators
    #[arg(long)]
    pub no_probes: bool,
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub scenario: ScenarioArgs,

    /// Also print routing tables at the end
    #[arg(long)]
    pub tables: bool,

    /// Only show nodes whose name starts with this prefix
    #[arg(long)]
    pub filter: Option<String>,
}

/// Table command arguments
#[derive(Args, Debug)]
pub struct TableArgs {
    #[command(flatten)]
    pub scenario: ScenarioArgs,

    /// Only print the table of this node
    #[arg(short, long)]
    pub node: Option<String>,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Validate the loaded configuration instead of printing the example
    #[arg(long)]
    pub validate: bool,

    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Completions command arguments
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Topology presets selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TopologyKind {
    Diamond,
    LeafSpine,
    FatTree,
}

/// Shell for completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

impl ScenarioArgs {
    /// Apply the overrides to `config`.
    pub fn apply(&self, config: &mut crate::Config) {
        use crate::sim::TopologyPreset;

        if let Some(duration) = self.duration {
            config.simulation.duration = duration;
        }

        let leaf_spine = self.leaf_spine.as_deref().unwrap_or(&[2, 2, 1]);
        let topology = match self.topology {
            Some(TopologyKind::Diamond) => Some(TopologyPreset::Diamond),
            Some(TopologyKind::LeafSpine) => Some(TopologyPreset::LeafSpine {
                leaves: leaf_spine[0],
                spines: leaf_spine[1],
                hosts_per_leaf: leaf_spine[2],
            }),
            Some(TopologyKind::FatTree) => Some(TopologyPreset::FatTree {
                k: self.k,
                hosts_per_edge: 1,
            }),
            None => None,
        };
        if let Some(topology) = topology {
            config.simulation.topology = topology;
        }

        if self.queue {
            config.hula.use_queue = true;
        }
        if self.no_probes {
            config.generator.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::TopologyPreset;
    use crate::Config;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "hula", "run", "--duration", "50ms", "--topology", "fat-tree", "--k", "6", "--queue",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = Config::default();
        args.scenario.apply(&mut config);
        assert_eq!(config.simulation.duration, Duration::from_millis(50));
        assert_eq!(
            config.simulation.topology,
            TopologyPreset::FatTree { k: 6, hosts_per_edge: 1 }
        );
        assert!(config.hula.use_queue);
        assert!(config.generator.enabled);
    }

    #[test]
    fn test_parse_table_leaf_spine() {
        let cli = Cli::try_parse_from([
            "hula",
            "table",
            "--topology",
            "leaf-spine",
            "--leaf-spine",
            "4",
            "2",
            "3",
            "--node",
            "leaf0",
        ])
        .unwrap();
        let Commands::Table(args) = cli.command else {
            panic!("expected table");
        };
        assert_eq!(args.node.as_deref(), Some("leaf0"));

        let mut config = Config::default();
        args.scenario.apply(&mut config);
        assert_eq!(
            config.simulation.topology,
            TopologyPreset::LeafSpine {
                leaves: 4,
                spines: 2,
                hosts_per_leaf: 3
            }
        );
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = Config::example();
        ScenarioArgs::default().apply(&mut config);
        assert_eq!(config.simulation.duration, Duration::from_millis(200));
        assert_eq!(config.simulation.topology, TopologyPreset::Diamond);
    }
}
