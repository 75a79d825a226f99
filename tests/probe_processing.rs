//! Probe processing through the public routing API.

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use hula::config::{HulaConfig, LoopSuppression};
use hula::error::{Error, Result};
use hula::protocol::{Packet, Ports, ProbeMessage, UtilizationByteOrder};
use hula::routing::{ControlDatagram, Environment, HulaRouting, InterfaceTable, LocalInterface, RoutingProtocol};
use hula::types::{InterfaceId, Ipv4Mask, NodeId, SimTime};

/// Records every probe the protocol broadcasts.
#[derive(Default)]
struct RecordingEnv {
    now: SimTime,
    queue: usize,
    sent: Vec<(InterfaceId, Bytes)>,
}

impl RecordingEnv {
    fn probes(&self) -> Vec<(InterfaceId, ProbeMessage)> {
        self.sent
            .iter()
            .map(|(i, p)| (*i, ProbeMessage::decode(p).unwrap()))
            .collect()
    }
}

impl Environment for RecordingEnv {
    fn now(&self) -> SimTime {
        self.now
    }

    fn broadcast(&mut self, interface: InterfaceId, payload: Bytes) -> Result<()> {
        self.sent.push((interface, payload));
        Ok(())
    }

    fn queue_depth(&self, _: InterfaceId) -> usize {
        self.queue
    }
}

fn switch_interfaces(links: u32) -> InterfaceTable {
    let mut table = InterfaceTable::with_loopback();
    for i in 1..=links {
        table.insert(LocalInterface::new(
            InterfaceId(i),
            format!("sw-eth{}", i - 1),
            Ipv4Addr::new(10, 0, i as u8, 1),
            Ipv4Mask::from_prefix_len(24),
        ));
    }
    table
}

fn switch(config: HulaConfig, links: u32) -> HulaRouting {
    let mut hula = HulaRouting::new(config).unwrap();
    hula.initialize(NodeId(7), &switch_interfaces(links)).unwrap();
    hula
}

fn probe_for(destination: Ipv4Addr, utilization: u64) -> ProbeMessage {
    ProbeMessage::new(destination, Ipv4Mask::HOST, utilization, 42)
}

const DST: Ipv4Addr = Ipv4Addr::new(10, 1, 6, 2);

#[test]
fn test_best_path_sequence() {
    let mut hula = switch(HulaConfig::default(), 3);
    let mut env = RecordingEnv::default();

    hula.on_probe_received(InterfaceId(1), &probe_for(DST, 60), 0, &mut env)
        .unwrap();
    let entry = *hula.table().lookup(DST).unwrap();
    assert_eq!((entry.interface, entry.utilization), (InterfaceId(1), 60));

    hula.on_probe_received(InterfaceId(1), &probe_for(DST, 50), 0, &mut env)
        .unwrap();
    let entry = *hula.table().lookup(DST).unwrap();
    assert_eq!((entry.interface, entry.utilization), (InterfaceId(1), 50));

    hula.on_probe_received(InterfaceId(2), &probe_for(DST, 30), 0, &mut env)
        .unwrap();
    let entry = *hula.table().lookup(DST).unwrap();
    assert_eq!((entry.interface, entry.utilization), (InterfaceId(2), 30));

    env.sent.clear();
    hula.on_probe_received(InterfaceId(1), &probe_for(DST, 80), 0, &mut env)
        .unwrap();
    let entry = *hula.table().lookup(DST).unwrap();
    assert_eq!((entry.interface, entry.utilization), (InterfaceId(2), 30));
    assert_eq!(hula.table().len(), 1);

    // The re-flooded probe advertises the kept path, and only leaves on the
    // interface that has never delivered a probe for this destination.
    let probes = env.probes();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].0, InterfaceId(3));
    assert_eq!(probes[0].1.utilization, 30);
    assert_eq!(probes[0].1.timestamp, 42);
}

#[test]
fn test_flooding_never_returns_to_sender() {
    let mut hula = switch(HulaConfig::default(), 4);
    let mut env = RecordingEnv::default();

    for (i, incoming) in [2, 4, 1, 3, 2].into_iter().enumerate() {
        env.sent.clear();
        hula.on_probe_received(InterfaceId(incoming), &probe_for(DST, 10 * i as u64), 0, &mut env)
            .unwrap();
        assert!(env.sent.iter().all(|(j, _)| *j != InterfaceId(incoming)));
    }
    // Every interface has delivered a probe for DST by now.
    assert!(env.sent.is_empty());
}

#[test]
fn test_edge_switch_keeps_remote_probes() {
    let mut hula = switch(HulaConfig::edge(), 3);
    let mut env = RecordingEnv::default();

    hula.on_probe_received(InterfaceId(2), &probe_for(DST, 5), 0, &mut env)
        .unwrap();
    assert!(env.sent.is_empty());
    assert!(hula.table().lookup(DST).is_some());
}

#[test]
fn test_local_prefix_flooded_from_owner_only() {
    let mut hula = switch(HulaConfig::edge(), 3);
    let host = Ipv4Addr::new(10, 0, 1, 2);
    let mut env = RecordingEnv::default();

    // Arrives from the attached host: flooded upward, never learned.
    let probe = ProbeMessage::new(host, Ipv4Mask::from_prefix_len(24), 0, 1);
    hula.on_probe_received(InterfaceId(1), &probe, 0, &mut env)
        .unwrap();
    let out: Vec<InterfaceId> = env.sent.iter().map(|(i, _)| *i).collect();
    assert_eq!(out, [InterfaceId(2), InterfaceId(3)]);
    assert!(hula.table().is_empty());

    // The same prefix reflected from the fabric is not flooded again.
    env.sent.clear();
    hula.on_probe_received(InterfaceId(2), &probe, 0, &mut env)
        .unwrap();
    assert!(env.sent.is_empty());
    assert!(hula.is_probe_allowed(host, InterfaceId(1)));
    assert!(!hula.is_probe_allowed(host, InterfaceId(3)));
}

#[test]
fn test_loop_suppression_modes() {
    // Loopback plus two links matches the default interface count.
    let mut hula = switch(HulaConfig::default(), 2);
    let mut env = RecordingEnv::default();
    hula.on_probe_received(InterfaceId(1), &probe_for(DST, 50), 0, &mut env)
        .unwrap();
    hula.on_probe_received(InterfaceId(2), &probe_for(DST, 1), 0, &mut env)
        .unwrap();
    assert_eq!(hula.table().lookup(DST).unwrap().interface, InterfaceId(1));
    assert_eq!(hula.stats().probes_dropped, 1);

    let config = HulaConfig {
        loop_suppression: LoopSuppression::Disabled,
        ..Default::default()
    };
    let mut hula = switch(config, 2);
    hula.on_probe_received(InterfaceId(1), &probe_for(DST, 50), 0, &mut env)
        .unwrap();
    hula.on_probe_received(InterfaceId(2), &probe_for(DST, 1), 0, &mut env)
        .unwrap();
    assert_eq!(hula.table().lookup(DST).unwrap().interface, InterfaceId(2));

    let config = HulaConfig {
        loop_suppression: LoopSuppression::Always,
        ..Default::default()
    };
    let mut hula = switch(config, 5);
    hula.on_probe_received(InterfaceId(1), &probe_for(DST, 50), 0, &mut env)
        .unwrap();
    hula.on_probe_received(InterfaceId(4), &probe_for(DST, 1), 0, &mut env)
        .unwrap();
    assert_eq!(hula.table().lookup(DST).unwrap().interface, InterfaceId(1));
}

#[test]
fn test_local_congestion_raises_advertised_utilization() {
    let mut hula = switch(HulaConfig::default(), 3);
    let mut env = RecordingEnv::default();
    hula.on_probe_received(InterfaceId(1), &probe_for(DST, 0), 0, &mut env)
        .unwrap();

    // Push data out of interface 1.
    let packet = Packet::udp(
        Ipv4Addr::new(10, 1, 1, 2),
        DST,
        Ports::new(40000, 80),
        Bytes::from(vec![0; 972]),
    );
    env.now = SimTime::from_micros(10);
    hula.route_output(&packet, None, &mut env).unwrap();

    env.now = SimTime::from_micros(20);
    env.sent.clear();
    hula.on_probe_received(InterfaceId(1), &probe_for(DST, 3), 0, &mut env)
        .unwrap();

    // 1000 bytes decayed by 10us/1ms, scaled by 1000.
    let entry = hula.table().lookup(DST).unwrap();
    assert_eq!(entry.utilization, 990_000);
    assert!(env.probes().iter().all(|(_, p)| p.utilization == 990_000));
}

#[test]
fn test_queue_mode_uses_queue_depth() {
    let config = HulaConfig {
        use_queue: true,
        ..Default::default()
    };
    let mut hula = switch(config, 3);
    let mut env = RecordingEnv {
        queue: 17,
        ..Default::default()
    };

    hula.on_probe_received(InterfaceId(2), &probe_for(DST, 4), 0, &mut env)
        .unwrap();
    assert_eq!(hula.table().lookup(DST).unwrap().utilization, 17);

    hula.on_probe_received(InterfaceId(2), &probe_for(DST, 40), 0, &mut env)
        .unwrap();
    assert_eq!(hula.table().lookup(DST).unwrap().utilization, 40);
}

#[test]
fn test_handle_read_dispatch() {
    let mut hula = switch(HulaConfig::default(), 3);
    let mut env = RecordingEnv::default();
    assert_eq!(hula.control_port(), Some(43333));

    let datagram = ControlDatagram {
        source: SocketAddrV4::new(Ipv4Addr::new(10, 0, 2, 2), 43333),
        incoming: Some(InterfaceId(2)),
        payload: Bytes::copy_from_slice(&probe_for(DST, 9).encode()),
    };
    hula.handle_read(&datagram, &mut env).unwrap();
    assert_eq!(hula.table().lookup(DST).unwrap().interface, InterfaceId(2));

    let missing = ControlDatagram {
        incoming: None,
        ..datagram.clone()
    };
    let err = hula.handle_read(&missing, &mut env).unwrap_err();
    assert!(matches!(err, Error::MissingInterfaceInfo));
    assert!(err.is_fatal());

    let truncated = ControlDatagram {
        payload: Bytes::from_static(&[0; 23]),
        ..datagram
    };
    hula.handle_read(&truncated, &mut env).unwrap();
    assert_eq!(hula.stats().probes_dropped, 1);
}

#[test]
fn test_network_byte_order_probes() {
    let config = HulaConfig {
        utilization_byte_order: UtilizationByteOrder::Network,
        ..Default::default()
    };
    let mut hula = switch(config, 3);
    let mut env = RecordingEnv::default();

    let probe = probe_for(DST, 0x0102_0304);
    let datagram = ControlDatagram {
        source: SocketAddrV4::new(Ipv4Addr::new(10, 0, 1, 2), 43333),
        incoming: Some(InterfaceId(1)),
        payload: Bytes::copy_from_slice(&probe.encode_with(UtilizationByteOrder::Network)),
    };
    hula.handle_read(&datagram, &mut env).unwrap();
    assert_eq!(hula.table().lookup(DST).unwrap().utilization, 0x0102_0304);

    let (_, payload) = &env.sent[0];
    assert_eq!(&payload[8..16], &0x0102_0304u64.to_be_bytes());
}
