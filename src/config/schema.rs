//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionFactory, SearchRequest, SearchScope};
use crate::heartbeat::{HeartbeatConnectionFactory, HeartbeatOptions};
use crate::load_balancer::{
    new_affinity_load_balancer, new_failover_load_balancer, new_round_robin_load_balancer, LoadBalancerOptions,
};
use crate::scheduler::{Scheduler, TokioScheduler};

/// Root configuration of the resilience layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Heartbeat wrapper settings.
    pub heartbeat: HeartbeatConfig,

    /// Load balancer settings.
    pub load_balancer: LoadBalancerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ResilienceConfig {
    /// Assemble the configured stack over one transport factory per server.
    ///
    /// Each server factory is wrapped for heartbeats when enabled, then all of
    /// them are placed behind the configured load balancer.
    pub fn build(&self, servers: Vec<Arc<dyn ConnectionFactory>>) -> Arc<dyn ConnectionFactory> {
        self.build_with(servers, LoadBalancerOptions::default())
    }

    /// Like [`build`](Self::build), taking the event listener and scheduler from `options`.
    ///
    /// One scheduler drives the recovery probe and every heartbeat factory. The
    /// monitoring interval always comes from the configuration.
    pub fn build_with(
        &self,
        servers: Vec<Arc<dyn ConnectionFactory>>,
        options: LoadBalancerOptions,
    ) -> Arc<dyn ConnectionFactory> {
        let LoadBalancerOptions { listener, scheduler, .. } = options;
        let scheduler: Arc<dyn Scheduler> = scheduler.unwrap_or_else(|| Arc::new(TokioScheduler::new()));

        let delegates: Vec<Arc<dyn ConnectionFactory>> = if self.heartbeat.enabled {
            servers
                .into_iter()
                .map(|server| {
                    let heartbeat = self.heartbeat.to_options().with_scheduler(Arc::clone(&scheduler));
                    Arc::new(HeartbeatConnectionFactory::with_options(server, heartbeat)) as Arc<dyn ConnectionFactory>
                })
                .collect()
        } else {
            servers
        };

        let mut options = self.load_balancer.to_options().with_scheduler(scheduler);
        options.listener = listener;
        match self.load_balancer.algorithm {
            Algorithm::RoundRobin => Arc::new(new_round_robin_load_balancer(delegates, options)),
            Algorithm::Failover => Arc::new(new_failover_load_balancer(delegates, options)),
            Algorithm::Affinity => Arc::new(new_affinity_load_balancer(delegates)),
        }
    }
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Wrap connection factories with heartbeat detection.
    pub enabled: bool,

    /// Idle time before a heartbeat is sent, in milliseconds.
    pub interval_ms: u64,

    /// Time allowed for a heartbeat to complete, in milliseconds.
    pub timeout_ms: u64,

    /// Base DN of the heartbeat search. Empty means the root DSE.
    pub base_dn: String,

    /// Scope of the heartbeat search.
    pub scope: SearchScope,

    /// Filter of the heartbeat search.
    pub filter: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            timeout_ms: 3_000,
            base_dn: String::new(),
            scope: SearchScope::BaseObject,
            filter: "(objectClass=*)".to_string(),
        }
    }
}

impl HeartbeatConfig {
    /// The heartbeat search. Requests no attributes.
    pub fn request(&self) -> SearchRequest {
        let mut request = SearchRequest::new(self.base_dn.clone(), self.scope, self.filter.clone());
        request.attributes = vec!["1.1".to_string()];
        request
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Options for a heartbeat factory using the default scheduler and clock.
    pub fn to_options(&self) -> HeartbeatOptions {
        HeartbeatOptions::new(self.interval(), self.timeout()).with_request(self.request())
    }
}

/// Load balancing algorithm.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Health-monitored, rotating start factory.
    #[default]
    RoundRobin,
    /// Health-monitored, first operational factory wins.
    Failover,
    /// Routed by target DN, no monitoring.
    Affinity,
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub algorithm: Algorithm,

    /// Recovery probe period for offline factories, in milliseconds. 0 disables it.
    pub monitoring_interval_ms: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RoundRobin,
            monitoring_interval_ms: 1_000,
        }
    }
}

impl LoadBalancerConfig {
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    pub fn to_options(&self) -> LoadBalancerOptions {
        LoadBalancerOptions::default().with_monitoring_interval(self.monitoring_interval())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
