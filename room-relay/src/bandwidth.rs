//! Bandwidth governor
//!
//! Polices the non-host endpoint of every forwarded message. The rate is a
//! lifetime average (bytes since admission over seconds since admission),
//! so an early burst in a long-lived connection is forgiven only slowly.
//! A relaxed limit applies during a grace period right after admission.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::room::Peer;
use relay_config::RelayConfig;
use std::time::{Duration, Instant};

/// Outcome of a bandwidth check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Peer may be taxed for another message
    Allowed,
    /// Enforcement is off for the peer's current phase
    Unlimited,
    /// Peer is over its limit and must be dropped
    Exceeded {
        /// Observed rate in bytes per second
        rate: f64,
        /// Limit that applied
        limit: i64,
        /// Whether the grace limit was the one applied
        in_grace_period: bool,
    },
}

impl Verdict {
    /// True unless the peer exceeded its limit
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Verdict::Exceeded { .. })
    }
}

/// Per-peer byte-rate policy
#[derive(Debug, Clone)]
pub struct BandwidthGovernor {
    /// Bytes per second after the grace period (<= 0 disables)
    bandwidth_limit: i64,
    /// Bytes per second during the grace period (<= 0 disables)
    grace_period_bandwidth_limit: i64,
    /// Length of the grace period
    grace_period: Duration,
}

impl BandwidthGovernor {
    /// Create a new governor
    pub fn new(bandwidth_limit: i64, grace_period_bandwidth_limit: i64, grace_period: Duration) -> Self {
        BandwidthGovernor {
            bandwidth_limit,
            grace_period_bandwidth_limit,
            grace_period,
        }
    }

    /// Create a governor from relay configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.bandwidth_limit,
            config.grace_period_bandwidth_limit,
            config.grace_period(),
        )
    }

    /// Governor that never disconnects anyone
    pub fn unlimited() -> Self {
        Self::new(0, 0, Duration::ZERO)
    }

    /// Whether the peer is still inside its grace period at `now`
    pub fn in_grace_period(&self, peer: &Peer, now: Instant) -> bool {
        peer.age(now) < self.grace_period
    }

    /// Limit that applies to the peer at `now`
    pub fn applicable_limit(&self, peer: &Peer, now: Instant) -> i64 {
        if self.in_grace_period(peer, now) {
            self.grace_period_bandwidth_limit
        } else {
            self.bandwidth_limit
        }
    }

    /// Lifetime-average rate in bytes per second, `None` at zero age
    pub fn rate(peer: &Peer, now: Instant) -> Option<f64> {
        let seconds = peer.age(now).as_secs_f64();
        if seconds > 0.0 {
            Some(peer.outgoing_bytes as f64 / seconds)
        } else {
            None
        }
    }

    /// Check the peer before it is taxed for another message
    pub fn check(&self, peer: &Peer, now: Instant) -> Verdict {
        let in_grace_period = self.in_grace_period(peer, now);
        let limit = if in_grace_period {
            self.grace_period_bandwidth_limit
        } else {
            self.bandwidth_limit
        };

        if limit <= 0 {
            return Verdict::Unlimited;
        }

        let Some(rate) = Self::rate(peer, now) else {
            return Verdict::Allowed;
        };
        if rate > limit as f64 {
            Verdict::Exceeded {
                rate,
                limit,
                in_grace_period,
            }
        } else {
            Verdict::Allowed
        }
    }
}
