//! Configuration files on disk.

use std::time::Duration;

use hula::config::{Config, LoopSuppression};
use hula::error::Error;
use hula::sim::{build_network, TopologyPreset};

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hula.toml");

    let mut config = Config::example();
    config.hula.loop_suppression = LoopSuppression::Always;
    config.simulation.topology = TopologyPreset::FatTree {
        k: 4,
        hosts_per_edge: 1,
    };
    config.simulation.traffic[0].destination = "h7".into();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.hula.loop_suppression, LoopSuppression::Always);
    assert_eq!(loaded.simulation.topology, config.simulation.topology);
    assert_eq!(loaded.simulation.duration, Duration::from_millis(200));
    assert_eq!(loaded.simulation.traffic[0].destination, "h7");
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_invalid_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hula.toml");
    std::fs::write(
        &path,
        r#"
        [simulation.topology]
        kind = "fat_tree"
        k = 3
        "#,
    )
    .unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_loaded_file_builds_network() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hula.toml");
    std::fs::write(
        &path,
        r#"
        [generator]
        interval = "100us"

        [simulation]
        duration = "2ms"

        [simulation.topology]
        kind = "leaf_spine"
        leaves = 2
        spines = 3

        [[simulation.traffic]]
        source = "h0"
        destination = "h1"
        flows = 4
        "#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    let mut network = build_network(&config).unwrap();
    let stats = network.run(config.simulation.duration).unwrap();

    assert_eq!(stats.nodes.len(), 7);
    assert!(stats.total.packets_delivered > 0);
    assert_eq!(stats.total.packets_unroutable, 0);
}
