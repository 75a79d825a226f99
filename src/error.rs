//! Error types for HULA.

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::types::{InterfaceId, NodeId, SimTime};

/// Result type alias for HULA operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for HULA.
#[derive(Error, Debug)]
pub enum Error {
    // Routing errors
    #[error("no route to host {0}")]
    NoRouteToHost(Ipv4Addr),

    #[error("interface {0} not found")]
    InterfaceNotFound(InterfaceId),

    #[error("received probe without incoming interface metadata")]
    MissingInterfaceInfo,

    // Protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Simulation errors
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("event scheduled in the past: now={now}, at={at}")]
    EventInPast { now: SimTime, at: SimTime },

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

/// Probe and packet parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("truncated message: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),
}

/// Transport collaborator errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("send failed on interface {interface}: {reason}")]
    SendFailed { interface: InterfaceId, reason: String },

    #[error("interface {0} has no device")]
    NoDevice(InterfaceId),
}

impl Error {
    /// Check if the error must abort the surrounding simulation.
    ///
    /// Missing receive metadata and socket setup failures are precondition
    /// violations of the transport and cannot be handled locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MissingInterfaceInfo
                | Error::Transport(TransportError::BindFailed { .. })
                | Error::EventInPast { .. }
        )
    }

    /// Check if the caller may fall back to another routing mechanism.
    pub fn is_no_route(&self) -> bool {
        matches!(self, Error::NoRouteToHost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::MissingInterfaceInfo.is_fatal());
        assert!(Error::Transport(TransportError::BindFailed {
            addr: "0.0.0.0:43333".into(),
            reason: "in use".into(),
        })
        .is_fatal());
        assert!(!Error::NoRouteToHost(Ipv4Addr::new(10, 0, 0, 1)).is_fatal());
        assert!(!Error::Protocol(ProtocolError::Truncated { needed: 24, got: 3 }).is_fatal());
    }

    #[test]
    fn test_no_route_is_recoverable() {
        let err = Error::NoRouteToHost(Ipv4Addr::new(10, 1, 6, 2));
        assert!(err.is_no_route());
        assert_eq!(err.to_string(), "no route to host 10.1.6.2");
    }

    #[test]
    fn test_context_passthrough() {
        use anyhow::Context;

        let failed: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err: Error = failed.context("Failed to format routing tables").unwrap_err().into();

        assert!(matches!(err, Error::Other(_)));
        assert!(!err.is_fatal());
        assert!(err.to_string().starts_with("Failed to format routing tables: "));
    }
}
