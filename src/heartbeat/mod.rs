//! Heartbeat liveness detection for individual connections.
//!
//! # Data Flow
//! ```text
//! HeartbeatConnectionFactory::get_connection()
//!     → delegate factory yields a raw connection
//!     → Initial heartbeat (bounded by the heartbeat timeout)
//!     → Wrapped in HeartbeatConnection, registered for idle detection
//!
//! Idle tick (every interval, while any connection is registered):
//!     → Connection idle >= interval / 2 and nothing exclusive in flight
//!     → Heartbeat search sent, deadline check scheduled after the timeout
//!     → Bind pending instead: no heartbeat, the bind gets the same deadline
//!     → Settled: activity recorded, queued binds released
//!     → Deadline passed: connection invalidated, listeners told, queue failed
//!
//! Application request:
//!     → Bind / StartTLS: waits while a heartbeat is in flight
//!     → Anything else: sent straight through
//!     → Every server response counts as activity
//! ```
//!
//! # Design Decisions
//! - One mutex-guarded state record per connection arbitrates heartbeats against binds
//! - Binds queued behind a heartbeat are released by the heartbeat settling, not by polling
//! - Late heartbeat results after close are ignored
//! - An invalid connection never becomes valid again

pub mod connection;
pub mod factory;

use std::sync::Arc;
use std::time::Duration;

use crate::connection::SearchRequest;
use crate::scheduler::{Scheduler, TimeService};

pub use connection::HeartbeatConnection;
pub use factory::HeartbeatConnectionFactory;

/// Default idle threshold before a heartbeat is sent.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default time allowed for a heartbeat to complete.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Heartbeat settings for a [`HeartbeatConnectionFactory`].
#[derive(Clone)]
pub struct HeartbeatOptions {
    /// Idle time after which a heartbeat is sent.
    pub interval: Duration,
    /// Time a heartbeat may take before the connection is declared dead.
    pub timeout: Duration,
    /// The liveness probe. Must be cheap and side-effect free.
    pub request: SearchRequest,
    pub scheduler: Option<Arc<dyn Scheduler>>,
    pub time_service: Option<Arc<dyn TimeService>>,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            request: SearchRequest::root_dse_probe(),
            scheduler: None,
            time_service: None,
        }
    }
}

impl HeartbeatOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request: SearchRequest) -> Self {
        self.request = request;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_time_service(mut self, time_service: Arc<dyn TimeService>) -> Self {
        self.time_service = Some(time_service);
        self
    }
}

impl std::fmt::Debug for HeartbeatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatOptions")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
