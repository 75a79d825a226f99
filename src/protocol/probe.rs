//! Probe message structure and wire encoding.

use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder, NativeEndian};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Ipv4Mask, Prefix, SimTime};

use super::PROBE_SIZE;

/// Byte order of the utilization field on the wire.
///
/// Deployed switches write the utilization in host order while every other
/// field is in network order. `Native` keeps bit compatibility with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilizationByteOrder {
    #[default]
    Native,
    Network,
}

impl UtilizationByteOrder {
    fn write(self, buf: &mut [u8], value: u64) {
        match self {
            Self::Native => NativeEndian::write_u64(buf, value),
            Self::Network => BigEndian::write_u64(buf, value),
        }
    }

    fn read(self, buf: &[u8]) -> u64 {
        match self {
            Self::Native => NativeEndian::read_u64(buf),
            Self::Network => BigEndian::read_u64(buf),
        }
    }
}

/// A HULA probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeMessage {
    /// Advertised destination address.
    pub destination: Ipv4Addr,
    /// Mask of the advertised prefix.
    pub mask: Ipv4Mask,
    /// Maximum link utilization seen along the path (lower is better).
    pub utilization: u64,
    /// Origination time in microseconds.
    pub timestamp: u64,
}

impl ProbeMessage {
    /// Create a probe.
    pub fn new(destination: Ipv4Addr, mask: Ipv4Mask, utilization: u64, timestamp: u64) -> Self {
        Self {
            destination,
            mask,
            utilization,
            timestamp,
        }
    }

    /// Create a fresh probe for `prefix`, stamped at `now`, with zero utilization.
    pub fn originate(prefix: Prefix, now: SimTime) -> Self {
        Self::new(prefix.address, prefix.mask, 0, now.as_micros())
    }

    /// Copy of this probe carrying a different utilization.
    pub fn with_utilization(&self, utilization: u64) -> Self {
        Self {
            utilization,
            ..*self
        }
    }

    /// Advertised prefix.
    pub fn prefix(&self) -> Prefix {
        Prefix::new(self.destination, self.mask)
    }

    /// Encode with the default (native) utilization byte order.
    pub fn encode(&self) -> [u8; PROBE_SIZE] {
        self.encode_with(UtilizationByteOrder::default())
    }

    /// Encode to the fixed 24-byte layout.
    pub fn encode_with(&self, order: UtilizationByteOrder) -> [u8; PROBE_SIZE] {
        let mut buf = [0u8; PROBE_SIZE];
        BigEndian::write_u32(&mut buf[0..4], u32::from(self.destination));
        BigEndian::write_u32(&mut buf[4..8], self.mask.bits());
        order.write(&mut buf[8..16], self.utilization);
        BigEndian::write_u64(&mut buf[16..24], self.timestamp);
        buf
    }

    /// Decode with the default (native) utilization byte order.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        Self::decode_with(buf, UtilizationByteOrder::default())
    }

    /// Decode from the fixed 24-byte layout. Trailing bytes are ignored.
    pub fn decode_with(buf: &[u8], order: UtilizationByteOrder) -> Result<Self, ProtocolError> {
        if buf.len() < PROBE_SIZE {
            return Err(ProtocolError::Truncated {
                needed: PROBE_SIZE,
                got: buf.len(),
            });
        }

        Ok(Self {
            destination: Ipv4Addr::from(BigEndian::read_u32(&buf[0..4])),
            mask: Ipv4Mask::from_bits(BigEndian::read_u32(&buf[4..8])),
            utilization: order.read(&buf[8..16]),
            timestamp: BigEndian::read_u64(&buf[16..24]),
        })
    }
}

impl fmt::Display for ProbeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dst={}, mask={}, max_util={}, timestamp={}",
            self.destination, self.mask, self.utilization, self.timestamp
        )
    }
}
