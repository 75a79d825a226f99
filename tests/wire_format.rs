//! Probe wire format as seen by other implementations.

use std::net::Ipv4Addr;

use hula::error::ProtocolError;
use hula::protocol::{ProbeMessage, UtilizationByteOrder, CONTROL_PORT, PROBE_DESTINATION, PROBE_SIZE};
use hula::types::{Ipv4Mask, Prefix, SimTime};

#[test]
fn test_probe_is_24_bytes() {
    assert_eq!(PROBE_SIZE, 24);
    let probe = ProbeMessage::new(Ipv4Addr::new(10, 1, 1, 2), Ipv4Mask::HOST, 7, 9);
    assert_eq!(probe.encode().len(), 24);
    assert_eq!(PROBE_DESTINATION.ip(), &Ipv4Addr::BROADCAST);
    assert_eq!(PROBE_DESTINATION.port(), CONTROL_PORT);
}

#[test]
fn test_field_offsets() {
    let probe = ProbeMessage::new(
        Ipv4Addr::new(192, 168, 7, 1),
        Ipv4Mask::from_prefix_len(16),
        0x1122_3344_5566_7788,
        0x0000_0001_0203_0405,
    );
    let bytes = probe.encode_with(UtilizationByteOrder::Network);

    assert_eq!(&bytes[0..4], &[192, 168, 7, 1]);
    assert_eq!(&bytes[4..8], &[0xff, 0xff, 0x00, 0x00]);
    assert_eq!(&bytes[8..16], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    assert_eq!(&bytes[16..24], &[0, 0, 0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_default_utilization_order_is_native() {
    let probe = ProbeMessage::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Mask::HOST, 0xabcd, 0);
    let bytes = probe.encode();
    assert_eq!(&bytes[8..16], &0xabcd_u64.to_ne_bytes());

    // Only the utilization differs between the two orders.
    let network = probe.encode_with(UtilizationByteOrder::Network);
    assert_eq!(bytes[..8], network[..8]);
    assert_eq!(bytes[16..], network[16..]);
}

#[test]
fn test_decode_from_raw_bytes() {
    let mut raw = vec![10, 0, 6, 2, 255, 255, 255, 0];
    raw.extend_from_slice(&1234u64.to_ne_bytes());
    raw.extend_from_slice(&5_000_000u64.to_be_bytes());

    let probe = ProbeMessage::decode(&raw).unwrap();
    assert_eq!(probe.destination, Ipv4Addr::new(10, 0, 6, 2));
    assert_eq!(probe.mask.prefix_len(), 24);
    assert_eq!(probe.utilization, 1234);
    assert_eq!(probe.timestamp, 5_000_000);
    assert_eq!(probe.prefix().to_string(), "10.0.6.2/24");
}

#[test]
fn test_truncated_probe_rejected() {
    for len in [0, 8, 16, 23] {
        let err = ProbeMessage::decode(&vec![0u8; len]).unwrap_err();
        assert_eq!(err, ProtocolError::Truncated { needed: 24, got: len });
    }
}

#[test]
fn test_originated_probe() {
    let prefix: Prefix = "10.0.1.2/24".parse().unwrap();
    let probe = ProbeMessage::originate(prefix, SimTime::from_millis(3));

    let decoded = ProbeMessage::decode(&probe.encode()).unwrap();
    assert_eq!(decoded.utilization, 0);
    assert_eq!(decoded.timestamp, 3000);
    assert_eq!(decoded.prefix(), prefix);
}
