//! Flow hash calculation for flowlet tracking.
//!
//! Every packet is identified by its 5-tuple. The 32-bit flow hash keys the
//! flowlet table, so packets of the same flow always hit the same record and
//! stay on the same path while their flowlet is active.

use std::net::Ipv4Addr;

/// Flow identifier containing the 5-tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId {
    /// Source IP address.
    pub src_ip: Ipv4Addr,
    /// Destination IP address.
    pub dst_ip: Ipv4Addr,
    /// Source port (0 when not TCP/UDP).
    pub src_port: u16,
    /// Destination port (0 when not TCP/UDP).
    pub dst_port: u16,
    /// IP protocol (6 = TCP, 17 = UDP).
    pub protocol: u8,
}

impl FlowId {
    /// Create a new flow identifier.
    pub fn new(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, src_port: u16, dst_port: u16, protocol: u8) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// 32-bit flow hash (MurmurHash3 over the packed 5-tuple).
    pub fn flow_hash(&self) -> u32 {
        let mut key = [0u8; 13];
        key[0..4].copy_from_slice(&self.src_ip.octets());
        key[4..8].copy_from_slice(&self.dst_ip.octets());
        key[8] = self.protocol;
        key[9..11].copy_from_slice(&self.src_port.to_be_bytes());
        key[11..13].copy_from_slice(&self.dst_port.to_be_bytes());
        murmur3_32(&key, 0)
    }
}

fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut hash = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k |= u32::from(*byte) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
    }

    // Finalization mix
    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{IPPROTO_TCP, IPPROTO_UDP};

    fn base_flow() -> FlowId {
        FlowId::new(
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Addr::new(10, 1, 6, 2),
            49153,
            9,
            IPPROTO_UDP,
        )
    }

    #[test]
    fn test_murmur3_reference_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"hello", 0), 0x248b_fa47);
    }

    #[test]
    fn test_flow_hash_consistency() {
        let flow = base_flow();
        assert_eq!(flow.flow_hash(), flow.flow_hash());
        let same = FlowId::new(flow.src_ip, flow.dst_ip, flow.src_port, flow.dst_port, flow.protocol);
        assert_eq!(flow.flow_hash(), same.flow_hash());
    }

    #[test]
    fn test_different_ports_different_hash() {
        let flow = base_flow();
        let other_src = FlowId {
            src_port: 49154,
            ..flow
        };
        let other_dst = FlowId { dst_port: 10, ..flow };
        assert_ne!(flow.flow_hash(), other_src.flow_hash());
        assert_ne!(flow.flow_hash(), other_dst.flow_hash());
    }

    #[test]
    fn test_protocol_matters() {
        let flow_udp = base_flow();
        let flow_tcp = FlowId {
            protocol: IPPROTO_TCP,
            ..flow_udp
        };
        assert_ne!(flow_tcp.flow_hash(), flow_udp.flow_hash());
    }

    #[test]
    fn test_direction_matters() {
        let flow = base_flow();
        let reverse = FlowId::new(flow.dst_ip, flow.src_ip, flow.dst_port, flow.src_port, flow.protocol);
        assert_ne!(flow.flow_hash(), reverse.flow_hash());
    }
}
