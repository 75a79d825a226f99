//! Per-interface link utilization estimator.
//!
//! A leaky, sample-driven approximation of the recent byte arrival rate on
//! each local interface. Every data or probe packet crossing an interface
//! is a sample; the estimate decays linearly with the time since the last
//! sample and is fully discounted once that gap reaches `tau`.
//!
//! The estimator also owns the anti-amplification list: destinations whose
//! probes arrived on an interface and must never be flooded back out of it.

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{InterfaceId, SimTime};

/// Scale applied to the estimate before it is advertised in a probe.
pub const CONGESTION_SCALE: f64 = 1000.0;

/// How the locally advertised utilization is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    /// Decayed byte-rate estimate, scaled by [`CONGESTION_SCALE`].
    #[default]
    Congestion,
    /// Instantaneous egress queue depth in packets.
    Queue,
}

/// Load state of one local interface.
#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    /// Time of the last sample.
    pub last_update: SimTime,
    /// Current estimate in bytes.
    pub utilization_estimate: f64,
    /// Destinations whose probes arrived on this interface.
    pub suppressed_destinations: HashSet<Ipv4Addr>,
}

impl ChannelInfo {
    /// Estimate scaled and rounded for advertisement.
    pub fn congestion_score(&self) -> u64 {
        (self.utilization_estimate * CONGESTION_SCALE).round() as u64
    }
}

/// Utilization estimator for all local interfaces of a node.
#[derive(Debug)]
pub struct UtilizationEstimator {
    tau: Duration,
    channels: BTreeMap<InterfaceId, ChannelInfo>,
}

impl UtilizationEstimator {
    /// Create an estimator with decay constant `tau`.
    pub fn new(tau: Duration) -> Self {
        Self {
            tau,
            channels: BTreeMap::new(),
        }
    }

    pub fn tau(&self) -> Duration {
        self.tau
    }

    /// Record `byte_count` bytes crossing `interface` at `now`.
    pub fn observe(&mut self, interface: InterfaceId, byte_count: usize, now: SimTime) {
        let tau = self.tau.as_secs_f64();
        let sample = byte_count as f64;

        match self.channels.get_mut(&interface) {
            None => {
                self.channels.insert(
                    interface,
                    ChannelInfo {
                        last_update: now,
                        utilization_estimate: sample,
                        suppressed_destinations: HashSet::new(),
                    },
                );
            }
            Some(channel) => {
                let dt = now.saturating_since(channel.last_update).as_secs_f64();
                // Past tau the weight would go negative: discount the history entirely.
                let weight = if dt < tau { 1.0 - dt / tau } else { 0.0 };
                channel.utilization_estimate = channel.utilization_estimate * weight + sample;
                channel.last_update = now;
            }
        }

        tracing::trace!(
            interface = %interface,
            bytes = byte_count,
            estimate = self.channels[&interface].utilization_estimate,
            "Utilization sample"
        );
    }

    /// Current estimate for `interface`, if it has been sampled.
    pub fn estimate(&self, interface: InterfaceId) -> Option<f64> {
        self.channels.get(&interface).map(|c| c.utilization_estimate)
    }

    /// Scaled estimate for `interface`, zero if never sampled.
    pub fn congestion_score(&self, interface: InterfaceId) -> u64 {
        self.channels
            .get(&interface)
            .map_or(0, ChannelInfo::congestion_score)
    }

    pub fn channel(&self, interface: InterfaceId) -> Option<&ChannelInfo> {
        self.channels.get(&interface)
    }

    pub fn channels(&self) -> impl Iterator<Item = (&InterfaceId, &ChannelInfo)> {
        self.channels.iter()
    }

    /// Never flood probes for `destination` back out of `interface`.
    pub fn suppress(&mut self, interface: InterfaceId, destination: Ipv4Addr) {
        self.channels
            .entry(interface)
            .or_default()
            .suppressed_destinations
            .insert(destination);
    }

    /// Check whether probes for `destination` may not leave via `interface`.
    pub fn is_suppressed(&self, interface: InterfaceId, destination: Ipv4Addr) -> bool {
        self.channels
            .get(&interface)
            .is_some_and(|c| c.suppressed_destinations.contains(&destination))
    }

    /// Drop all channel state.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IF1: InterfaceId = InterfaceId(1);

    fn estimator() -> UtilizationEstimator {
        UtilizationEstimator::new(Duration::from_millis(1))
    }

    #[test]
    fn test_first_observation() {
        let mut est = estimator();
        assert_eq!(est.estimate(IF1), None);
        est.observe(IF1, 1500, SimTime::from_millis(10));
        assert_eq!(est.estimate(IF1), Some(1500.0));
        assert_eq!(est.congestion_score(IF1), 1_500_000);
    }

    #[test]
    fn test_partial_decay() {
        let mut est = estimator();
        est.observe(IF1, 1000, SimTime::from_millis(10));
        // dt = 250us, tau = 1ms -> weight 0.75
        est.observe(IF1, 100, SimTime::from_millis(10) + Duration::from_micros(250));
        let value = est.estimate(IF1).unwrap();
        assert!((value - (1000.0 * 0.75 + 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_full_decay_at_tau() {
        let mut est = estimator();
        est.observe(IF1, 1000, SimTime::from_millis(10));
        est.observe(IF1, 24, SimTime::from_millis(11));
        assert_eq!(est.estimate(IF1), Some(24.0));

        est.observe(IF1, 64, SimTime::from_secs_f64(5.0));
        assert_eq!(est.estimate(IF1), Some(64.0));
    }

    #[test]
    fn test_same_instant_accumulates() {
        let mut est = estimator();
        let now = SimTime::from_millis(3);
        est.observe(IF1, 10, now);
        est.observe(IF1, 20, now);
        assert_eq!(est.estimate(IF1), Some(30.0));
    }

    #[test]
    fn test_last_update_tracks_samples() {
        let mut est = estimator();
        est.observe(IF1, 10, SimTime::from_millis(3));
        est.observe(IF1, 10, SimTime::from_millis(7));
        assert_eq!(est.channel(IF1).unwrap().last_update, SimTime::from_millis(7));
    }

    #[test]
    fn test_suppression_is_per_interface() {
        let mut est = estimator();
        let dst = Ipv4Addr::new(10, 1, 6, 2);
        est.suppress(IF1, dst);
        assert!(est.is_suppressed(IF1, dst));
        assert!(!est.is_suppressed(InterfaceId(2), dst));
        assert!(!est.is_suppressed(IF1, Ipv4Addr::new(10, 1, 6, 3)));
    }

    #[test]
    fn test_suppression_survives_samples() {
        let mut est = estimator();
        let dst = Ipv4Addr::new(10, 1, 6, 2);
        est.suppress(IF1, dst);
        est.observe(IF1, 100, SimTime::from_millis(1));
        est.observe(IF1, 100, SimTime::from_millis(2));
        assert!(est.is_suppressed(IF1, dst));
    }

    #[test]
    fn test_clear() {
        let mut est = estimator();
        est.observe(IF1, 100, SimTime::ZERO);
        est.clear();
        assert_eq!(est.channels().count(), 0);
    }
}
