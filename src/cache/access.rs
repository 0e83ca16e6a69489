//! Per-key access tracking for promotion and demotion.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Trailing window over which access frequency is measured
pub const ACCESS_WINDOW: Duration = Duration::from_secs(60);

/// Where a key currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Process-local, fastest
    L1,
    /// Shared, network-backed
    L2,
    /// Process-local fallback
    L3,
    None,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "l1"),
            CacheTier::L2 => write!(f, "l2"),
            CacheTier::L3 => write!(f, "l3"),
            CacheTier::None => write!(f, "none"),
        }
    }
}

/// Sliding one-minute window of reads for one key
#[derive(Debug, Clone)]
pub struct AccessRecord {
    accesses: VecDeque<Instant>,
    last_access: Instant,
    tier: CacheTier,
}

impl AccessRecord {
    /// New record with no accesses yet
    pub fn new(tier: CacheTier) -> Self {
        Self {
            accesses: VecDeque::new(),
            last_access: Instant::now(),
            tier,
        }
    }

    /// Record one read at `now`
    pub fn record_access(&mut self, now: Instant) {
        self.prune(now);
        self.accesses.push_back(now);
        self.last_access = now;
    }

    /// Reads within the trailing window ending at `now`
    pub fn frequency(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.accesses.len()
    }

    /// Time since the last read (or creation)
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    pub fn set_tier(&mut self, tier: CacheTier) {
        self.tier = tier;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.accesses.front() {
            if now.saturating_duration_since(*oldest) >= ACCESS_WINDOW {
                self.accesses.pop_front();
            } else {
                break;
            }
        }
    }
}
