//! # HULA
//!
//! Congestion-aware, flowlet-granular load balancing for multi-path
//! data-center fabrics.
//!
//! Hosts periodically flood probes for their prefix. Every switch keeps, per
//! destination prefix, the next hop whose path reported the lowest maximum
//! link utilization, and re-floods the probe with its own utilization folded
//! in. Data packets follow the best next hop, but bursts of the same flow
//! (flowlets) stay pinned to one path so packets are not reordered.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Simulation (sim::Network)                    │
//! │    links, egress queues, probe generators, traffic, sinks       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              Routing list (priority ordered, first wins)        │
//! │        ┌────────────────────┐    ┌────────────────────┐         │
//! │        │ HULA (priority 20) │    │ Static (priority 0)│         │
//! │        └────────────────────┘    └────────────────────┘         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Routing table │ Flowlet table │ Utilization estimator │ Hash   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Probe codec (24 bytes, UDP 43333)               │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_possible_truncation)]  // Interface and node indices fit in u32
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]       // Acceptable for rates and stats
#![allow(clippy::similar_names)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod multipath;
pub mod protocol;
pub mod routing;
pub mod sim;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, HulaConfig, LoopSuppression};
    pub use crate::error::{Error, Result};
    pub use crate::multipath::{FlowletTable, RoutingTable, UtilizationEstimator};
    pub use crate::protocol::{Packet, Ports, ProbeMessage, UtilizationByteOrder};
    pub use crate::routing::{Environment, HulaRouting, RoutingList, RoutingProtocol, StaticRouting};
    pub use crate::sim::{Network, NodeRole, TopologyBuilder, TopologyPreset};
    pub use crate::types::*;
}
