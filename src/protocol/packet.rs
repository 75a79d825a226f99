//! IPv4 datagram model used by the forwarding path.

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::multipath::FlowId;

use super::{IPPROTO_TCP, IPPROTO_UDP, IPV4_HEADER_SIZE, TCP_HEADER_SIZE, UDP_HEADER_SIZE};

/// Default TTL for locally originated datagrams.
pub const DEFAULT_TTL: u8 = 64;

/// IPv4 header fields relevant to routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    /// Fragment offset in 8-byte units; non-zero for trailing fragments.
    pub fragment_offset: u16,
}

impl Ipv4Header {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8) -> Self {
        Self {
            source,
            destination,
            protocol,
            ttl: DEFAULT_TTL,
            fragment_offset: 0,
        }
    }

    /// Transport headers are only present in the first fragment.
    pub fn carries_transport_header(&self) -> bool {
        self.fragment_offset == 0 && matches!(self.protocol, IPPROTO_TCP | IPPROTO_UDP)
    }
}

/// Transport-layer port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ports {
    pub source: u16,
    pub destination: u16,
}

impl Ports {
    pub fn new(source: u16, destination: u16) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// A datagram travelling through the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Ipv4Header,
    /// Present for TCP and UDP datagrams.
    pub ports: Option<Ports>,
    pub payload: Bytes,
}

impl Packet {
    /// Build a UDP datagram.
    pub fn udp(source: Ipv4Addr, destination: Ipv4Addr, ports: Ports, payload: Bytes) -> Self {
        Self {
            header: Ipv4Header::new(source, destination, IPPROTO_UDP),
            ports: Some(ports),
            payload,
        }
    }

    /// Build a TCP segment (header only, no connection state).
    pub fn tcp(source: Ipv4Addr, destination: Ipv4Addr, ports: Ports, payload: Bytes) -> Self {
        Self {
            header: Ipv4Header::new(source, destination, IPPROTO_TCP),
            ports: Some(ports),
            payload,
        }
    }

    /// Build a datagram of an arbitrary protocol without ports.
    pub fn raw(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8, payload: Bytes) -> Self {
        Self {
            header: Ipv4Header::new(source, destination, protocol),
            ports: None,
            payload,
        }
    }

    /// Size on the wire including IPv4 and transport headers.
    pub fn size(&self) -> usize {
        let transport = match (self.header.protocol, self.ports) {
            (IPPROTO_UDP, Some(_)) => UDP_HEADER_SIZE,
            (IPPROTO_TCP, Some(_)) => TCP_HEADER_SIZE,
            _ => 0,
        };
        IPV4_HEADER_SIZE + transport + self.payload.len()
    }

    /// 5-tuple of this datagram. Ports are zero unless the datagram is the
    /// first fragment of a TCP or UDP packet.
    pub fn flow_id(&self) -> FlowId {
        let ports = if self.header.carries_transport_header() {
            self.ports.unwrap_or_default()
        } else {
            Ports::default()
        };
        FlowId::new(
            self.header.source,
            self.header.destination,
            ports.source,
            ports.destination,
            self.header.protocol,
        )
    }

    /// Check if this datagram is addressed to the limited broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.header.destination.is_broadcast()
    }

    pub fn is_multicast(&self) -> bool {
        self.header.destination.is_multicast()
    }
}
