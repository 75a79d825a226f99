//! Congestion-aware multi-path state of a HULA node.
//!
//! This module implements the data structures behind path selection:
//! - Per-interface utilization estimation
//! - Best-path routing table with probe merge
//! - Flowlet detection and path pinning
//! - 5-tuple flow hashing

mod estimator;
mod flow_hash;
mod flowlet;
mod routing_table;

pub use estimator::{AdvertiseMode, ChannelInfo, UtilizationEstimator, CONGESTION_SCALE};
pub use flow_hash::FlowId;
pub use flowlet::{FlowletRecord, FlowletTable};
pub use routing_table::{MergeAction, RoutingEntry, RoutingTable};

use std::time::Duration;

/// Default estimator decay constant.
pub const DEFAULT_TAU: Duration = Duration::from_millis(1);

/// Default idle gap that ends a flowlet.
pub const DEFAULT_FLOWLET_INTERVAL: Duration = Duration::from_micros(100);
