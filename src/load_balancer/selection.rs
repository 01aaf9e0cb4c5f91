//! Start-index selection for the health-monitored balancer.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Which delegate an acquisition tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Rotate through delegates, one step per acquisition.
    /// Used to spread load within a data center.
    RoundRobin,
    /// Always start with the first delegate, so the first operational one wins.
    /// Used to prefer the closest data center.
    Failover,
}

/// Stateful selector implementing a [`SelectionPolicy`].
#[derive(Debug)]
pub struct Selector {
    policy: SelectionPolicy,
    counter: AtomicUsize,
}

impl Selector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Index of the delegate to try first, in `[0, len)`.
    pub fn initial_index(&self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        match self.policy {
            // Concurrent callers may rotate past each other; each still gets a valid start.
            SelectionPolicy::RoundRobin => self.counter.fetch_add(1, Ordering::Relaxed) % len,
            SelectionPolicy::Failover => 0,
        }
    }
}
