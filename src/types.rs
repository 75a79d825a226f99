//! Core types used throughout HULA.

use std::fmt;
use std::net::Ipv4Addr;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Index of an IPv4 interface on a node.
///
/// Interface 0 is the loopback on every node, matching the usual IPv4 stack
/// layout; point-to-point devices start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterfaceId(pub u32);

impl InterfaceId {
    pub const LOOPBACK: Self = Self(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_loopback(self) -> bool {
        self == Self::LOOPBACK
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for InterfaceId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifier of a node in the simulated network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic simulation clock value, nanosecond resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs.max(0.0) * 1e9).round() as u64)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    pub fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for SimTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        let nanos = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

impl AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// IPv4 network mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Mask(u32);

impl Ipv4Mask {
    pub const HOST: Self = Self(u32::MAX);
    pub const ANY: Self = Self(0);

    /// Build a mask without validation (wire values are taken as-is).
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn from_prefix_len(len: u8) -> Self {
        match len {
            0 => Self(0),
            l if l >= 32 => Self(u32::MAX),
            l => Self(u32::MAX << (32 - u32::from(l))),
        }
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Leading one bits. Only meaningful for contiguous masks.
    pub fn prefix_len(self) -> u8 {
        self.0.leading_ones() as u8
    }

    /// True when the mask is a run of ones followed by zeros.
    pub fn is_contiguous(self) -> bool {
        self.0.leading_ones() + self.0.trailing_zeros() == 32
    }

    /// Network part of `addr` under this mask.
    pub fn apply(self, addr: Ipv4Addr) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(addr) & self.0)
    }

    /// True when both addresses fall in the same network under this mask.
    pub fn is_match(self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        self.apply(a) == self.apply(b)
    }
}

impl Default for Ipv4Mask {
    fn default() -> Self {
        Self::HOST
    }
}

impl fmt::Display for Ipv4Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(self.0))
    }
}

impl FromStr for Ipv4Mask {
    type Err = ProtocolError;

    /// Accepts `/24`, `24` or dotted notation. Dotted masks need not be
    /// contiguous.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix('/').unwrap_or(s);
        if let Ok(len) = digits.parse::<u8>() {
            if len > 32 {
                return Err(ProtocolError::InvalidPrefix(s.to_string()));
            }
            return Ok(Self::from_prefix_len(len));
        }
        let addr: Ipv4Addr = s
            .parse()
            .map_err(|_| ProtocolError::InvalidPrefix(s.to_string()))?;
        Ok(Self::from_bits(u32::from(addr)))
    }
}

impl TryFrom<String> for Ipv4Mask {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Mask> for String {
    fn from(mask: Ipv4Mask) -> Self {
        if mask.is_contiguous() {
            format!("/{}", mask.prefix_len())
        } else {
            mask.to_string()
        }
    }
}

/// Destination prefix: an address together with its mask.
///
/// The address is kept as advertised rather than normalized, so a `/32`
/// host prefix prints as the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix {
    pub address: Ipv4Addr,
    pub mask: Ipv4Mask,
}

impl Prefix {
    pub fn new(address: Ipv4Addr, mask: Ipv4Mask) -> Self {
        Self { address, mask }
    }

    pub fn host(address: Ipv4Addr) -> Self {
        Self::new(address, Ipv4Mask::HOST)
    }

    /// Network address (address with host bits cleared).
    pub fn network(&self) -> Ipv4Addr {
        self.mask.apply(self.address)
    }

    /// True when `addr` falls in this prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.mask.is_match(self.address, addr)
    }

    pub fn is_host(&self) -> bool {
        self.mask == Ipv4Mask::HOST
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mask.is_contiguous() {
            write!(f, "{}/{}", self.address, self.mask.prefix_len())
        } else {
            write!(f, "{}/{}", self.address, self.mask)
        }
    }
}

impl FromStr for Prefix {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, mask) = match s.split_once('/') {
            Some((addr, mask)) => (addr, mask.parse::<Ipv4Mask>()?),
            None => (s, Ipv4Mask::HOST),
        };
        let address = addr
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidPrefix(s.to_string()))?;
        Ok(Self::new(address, mask))
    }
}

impl TryFrom<String> for Prefix {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Prefix> for String {
    fn from(prefix: Prefix) -> Self {
        prefix.to_string()
    }
}

/// Per-node traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub probes_received: u64,
    pub probes_sent: u64,
    pub probes_dropped: u64,
    pub packets_forwarded: u64,
    pub packets_delivered: u64,
    pub packets_unroutable: u64,
}

impl TrafficStats {
    pub fn add(&mut self, other: &Self) {
        self.probes_received += other.probes_received;
        self.probes_sent += other.probes_sent;
        self.probes_dropped += other.probes_dropped;
        self.packets_forwarded += other.packets_forwarded;
        self.packets_delivered += other.packets_delivered;
        self.packets_unroutable += other.packets_unroutable;
    }
}
