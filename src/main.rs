//! HULA CLI - congestion-aware load-balancing simulator.

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

use hula::cli::*;
use hula::config::{init_logging, Config};
use hula::error::Result;
use hula::sim::{build_network, Network, NetworkStats, NodeRole};
use hula::VERSION;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_config = hula::config::LoggingConfig {
        level: cli.log_level.clone(),
        color: !cli.no_color,
        ..Default::default()
    };
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Load config if specified
    let config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    // Dispatch command
    match cli.command {
        Commands::Run(args) => run_simulation(args, config, cli.format),
        Commands::Table(args) => run_table(args, config),
        Commands::Config(args) => run_config(args, &config),
        Commands::Completions(args) => run_completions(args),
    }
}

fn banner(title: &str) {
    println!("{}", "╔══════════════════════════════════════════╗".bright_cyan());
    println!("{}", format!("║     {title:<37}║").bright_cyan());
    println!("{}", format!("║     Version {VERSION:<29}║").bright_cyan());
    println!("{}", "╚══════════════════════════════════════════╝".bright_cyan());
    println!();
}

/// Build the configured network and run it to completion.
fn simulate(scenario: &ScenarioArgs, mut config: Config) -> Result<(Network, NetworkStats)> {
    scenario.apply(&mut config);
    config.validate()?;

    let mut network = build_network(&config)?;
    let stats = network.run(config.simulation.duration)?;
    Ok((network, stats))
}

/// Run a simulation and print counters
fn run_simulation(args: RunArgs, config: Config, format: OutputFormat) -> Result<()> {
    let (network, stats) = simulate(&args.scenario, config)?;

    if format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&stats)
            .context("Failed to serialize stats")?;
        println!("{json}");
        return Ok(());
    }

    banner("HULA SIMULATION");
    println!(
        "  {} {}   {} {}   {} {}",
        "Time:".bright_white(),
        stats.now,
        "Events:".bright_white(),
        stats.events,
        "Links:".bright_white(),
        network.link_count()
    );
    println!();

    println!(
        "  {:<12} {:<5} {:>9} {:>9} {:>8} {:>10} {:>10} {:>10}",
        "NODE".bright_white(),
        "ROLE".bright_white(),
        "PROBE RX".bright_white(),
        "PROBE TX".bright_white(),
        "DROPPED".bright_white(),
        "FORWARDED".bright_white(),
        "DELIVERED".bright_white(),
        "NO ROUTE".bright_white()
    );
    println!("  {}", "─".repeat(82).dimmed());

    let filter = args.filter.as_deref().unwrap_or("");
    for node in stats.nodes.iter().filter(|n| n.name.starts_with(filter)) {
        let role = match node.role {
            NodeRole::Host => "host".green(),
            NodeRole::Edge => "edge".cyan(),
            NodeRole::Core => "core".magenta(),
        };
        let unroutable = if node.traffic.packets_unroutable > 0 {
            node.traffic.packets_unroutable.to_string().red()
        } else {
            "0".dimmed()
        };
        println!(
            "  {:<12} {:<5} {:>9} {:>9} {:>8} {:>10} {:>10} {:>10}",
            node.name,
            role,
            node.traffic.probes_received,
            node.traffic.probes_sent,
            node.traffic.probes_dropped,
            node.traffic.packets_forwarded,
            node.traffic.packets_delivered,
            unroutable
        );
    }
    println!();

    // Load split on edge switch uplinks
    println!("{}", "Uplink usage:".bright_white().bold());
    for node in network.nodes().filter(|n| n.role() == NodeRole::Edge) {
        if !node.name().starts_with(filter) {
            continue;
        }
        let usage: Vec<String> = node
            .interfaces()
            .active()
            .filter_map(|i| {
                let (peer, _) = node.peer(i.id)?;
                let peer = network.node(peer).ok()?;
                if peer.role() == NodeRole::Host {
                    return None;
                }
                let tx = node.device_stats(i.id)?.tx_packets;
                Some(format!("{} {}", peer.name(), tx))
            })
            .collect();
        println!("  {} {} {}", "→".cyan(), node.name(), usage.join(", ").dimmed());
    }
    println!();

    let total = &stats.total;
    println!(
        "  {} {} delivered, {} forwarded, {} unroutable",
        "Total:".bright_white(),
        total.packets_delivered.to_string().green(),
        total.packets_forwarded,
        total.packets_unroutable
    );

    if args.tables {
        println!();
        print_tables(&network, None)?;
    }

    Ok(())
}

/// Run a simulation and print routing tables
fn run_table(args: TableArgs, config: Config) -> Result<()> {
    let (network, _) = simulate(&args.scenario, config)?;
    print_tables(&network, args.node.as_deref())
}

fn print_tables(network: &Network, node: Option<&str>) -> Result<()> {
    let mut out = String::new();
    match node {
        Some(name) => {
            let id = network
                .node_id(name)
                .ok_or_else(|| hula::Error::Config(format!("Unknown node: {name}")))?;
            let node = network.node(id)?;
            hula::routing::RoutingProtocol::print_table(node.routing(), &mut out)
                .with_context(|| format!("Failed to format routing table of {name}"))?;
        }
        None => network
            .print_tables(&mut out)
            .context("Failed to format routing tables")?,
    }
    print!("{out}");
    Ok(())
}

/// Show example configuration or validate the loaded one
fn run_config(args: ConfigArgs, config: &Config) -> Result<()> {
    if args.validate {
        config.validate()?;
        println!("{} Configuration is valid", "✓".green());
        return Ok(());
    }

    let output = toml::to_string_pretty(&Config::example())
        .map_err(|e| hula::Error::Config(format!("Failed to serialize config: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{output}");
    }

    Ok(())
}

/// Generate shell completions
fn run_completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::generate;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    let shell = match args.shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
    };

    generate(shell, &mut cmd, name, &mut std::io::stdout());

    Ok(())
}
