//! Load balancing across delegate connection factories.
//!
//! # Data Flow
//! ```text
//! Routed (routed.rs):
//!     Request → routing.rs (start index = route(request) mod N)
//!     → Linear probe delegates[start..] until one yields a connection
//!     → Request executed, delegate connection closed
//!
//! Health-monitored (monitored.rs):
//!     get_connection() → selection.rs (round-robin or fail-over start index)
//!     → Skip Offline delegates, try Online ones in order
//!     → Failure: health/state.rs marks Offline, listener.rs notified
//!     → health/monitor.rs probes Offline delegates until all are back
//! ```
//!
//! # Design Decisions
//! - Only connection acquisition fails over; in-flight operations are never retried
//! - When every delegate fails, the cause is the last error observed
//! - Balancers reference delegates and forward `close()`; they do not own them
//! - Two strategies: reactive (routed) and proactive (health-monitored)

pub mod listener;
pub mod monitored;
pub mod routed;
pub mod routing;
pub mod selection;

use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionFactory;
use crate::scheduler::Scheduler;

pub use listener::{LoadBalancerEventListener, LogEvents};
pub use monitored::HealthMonitoredLoadBalancer;
pub use routed::{RequestRoutingConnection, RoutedLoadBalancer};
pub use routing::{AffinityRouting, RoutingFunction};
pub use selection::SelectionPolicy;

/// Default period of the offline recovery probe.
pub const DEFAULT_MONITORING_INTERVAL: Duration = Duration::from_secs(1);

/// Options shared by the health-monitored balancers.
#[derive(Clone)]
pub struct LoadBalancerOptions {
    /// Period of the recovery probe. Zero disables recovery.
    pub monitoring_interval: Duration,
    /// Receives offline/online notifications. Defaults to [`LogEvents`].
    pub listener: Option<Arc<dyn LoadBalancerEventListener>>,
    /// Runs the recovery probe. Defaults to a [`TokioScheduler`](crate::scheduler::TokioScheduler).
    pub scheduler: Option<Arc<dyn Scheduler>>,
}

impl Default for LoadBalancerOptions {
    fn default() -> Self {
        Self {
            monitoring_interval: DEFAULT_MONITORING_INTERVAL,
            listener: None,
            scheduler: None,
        }
    }
}

impl LoadBalancerOptions {
    pub fn with_monitoring_interval(mut self, interval: Duration) -> Self {
        self.monitoring_interval = interval;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn LoadBalancerEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl std::fmt::Debug for LoadBalancerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancerOptions")
            .field("monitoring_interval", &self.monitoring_interval)
            .field("listener", &self.listener.is_some())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// Spread connections across `factories`, rotating the first factory tried.
pub fn new_round_robin_load_balancer(
    factories: Vec<Arc<dyn ConnectionFactory>>,
    options: LoadBalancerOptions,
) -> HealthMonitoredLoadBalancer {
    HealthMonitoredLoadBalancer::new("round-robin", factories, SelectionPolicy::RoundRobin, options)
}

/// Always prefer the first operational factory in `factories`.
pub fn new_failover_load_balancer(
    factories: Vec<Arc<dyn ConnectionFactory>>,
    options: LoadBalancerOptions,
) -> HealthMonitoredLoadBalancer {
    HealthMonitoredLoadBalancer::new("failover", factories, SelectionPolicy::Failover, options)
}

/// Route requests targeting the same entry to the same factory.
pub fn new_affinity_load_balancer(factories: Vec<Arc<dyn ConnectionFactory>>) -> RoutedLoadBalancer {
    RoutedLoadBalancer::new("affinity", factories, Arc::new(AffinityRouting::new()))
}
