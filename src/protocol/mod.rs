//! Wire protocol for HULA.
//!
//! ## Probe Format
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────┐
//! │ Destination (4, BE)      │ Prefix mask (4, BE)      │
//! ├──────────────────────────┴──────────────────────────┤
//! │ Max utilization (8, host order by default)          │
//! ├─────────────────────────────────────────────────────┤
//! │ Timestamp, microseconds (8, BE)                     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Probes are broadcast to `255.255.255.255` on [`CONTROL_PORT`].

mod packet;
mod probe;

pub use packet::{Ipv4Header, Packet, Ports, DEFAULT_TTL};
pub use probe::{ProbeMessage, UtilizationByteOrder};

use std::net::{Ipv4Addr, SocketAddrV4};

/// Probe size in bytes.
pub const PROBE_SIZE: usize = 24;

/// UDP port probes are exchanged on.
pub const CONTROL_PORT: u16 = 43333;

/// Where probes are sent.
pub const PROBE_DESTINATION: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::BROADCAST, CONTROL_PORT);

/// IPv4 header size without options.
pub const IPV4_HEADER_SIZE: usize = 20;

/// UDP header size.
pub const UDP_HEADER_SIZE: usize = 8;

/// TCP header size without options.
pub const TCP_HEADER_SIZE: usize = 20;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
