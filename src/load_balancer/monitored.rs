//! Health-monitored load balancer.
//!
//! # Responsibilities
//! - Pick a start delegate (round-robin or fail-over) and probe forward
//! - Skip delegates known to be offline
//! - Take failing delegates offline and notify the event listener
//! - Bring delegates back through the offline monitor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;

use crate::connection::{Connection, ConnectionFactory, LdapError, LdapResult};
use crate::health::monitor::{probe_offline_delegates, OfflineMonitor};
use crate::health::state::DelegateRecord;
use crate::load_balancer::listener::{LoadBalancerEventListener, LogEvents};
use crate::load_balancer::selection::{SelectionPolicy, Selector};
use crate::load_balancer::LoadBalancerOptions;
use crate::observability::metrics;
use crate::scheduler::{Spawner, Task, TokioScheduler};

/// Load balancer keeping live online/offline state for each delegate factory.
pub struct HealthMonitoredLoadBalancer {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    delegates: Vec<Arc<DelegateRecord>>,
    selector: Selector,
    listener: Arc<dyn LoadBalancerEventListener>,
    monitor: OfflineMonitor,
    spawner: Spawner,
    /// Error from the most recent failed acquisition through any delegate.
    last_failure: Mutex<Option<LdapError>>,
    closed: AtomicBool,
}

impl HealthMonitoredLoadBalancer {
    /// Create a balancer over `factories`; all start online.
    pub fn new(
        name: impl Into<String>,
        factories: Vec<Arc<dyn ConnectionFactory>>,
        policy: SelectionPolicy,
        options: LoadBalancerOptions,
    ) -> Self {
        let name = name.into();
        let delegates: Vec<Arc<DelegateRecord>> = factories
            .into_iter()
            .enumerate()
            .map(|(index, factory)| Arc::new(DelegateRecord::new(index, factory)))
            .collect();

        for delegate in &delegates {
            metrics::record_factory_state(&name, delegate.index, true);
        }

        let scheduler = options
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new()));
        let listener = options.listener.unwrap_or_else(|| Arc::new(LogEvents));

        tracing::debug!(
            balancer = %name,
            delegates = delegates.len(),
            policy = ?policy,
            monitoring_interval_ms = options.monitoring_interval.as_millis() as u64,
            "Load balancer created"
        );

        Self {
            shared: Arc::new(Shared {
                name,
                delegates,
                selector: Selector::new(policy),
                listener,
                monitor: OfflineMonitor::new(scheduler, options.monitoring_interval),
                spawner: Spawner::current(),
                last_failure: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Records of the wrapped factories, in construction order.
    pub fn delegates(&self) -> &[Arc<DelegateRecord>] {
        &self.shared.delegates
    }

    /// Return true while the offline monitor task is scheduled.
    pub fn is_monitoring(&self) -> bool {
        self.shared.monitor.is_running()
    }
}

impl Shared {
    fn record_failure(self: &Arc<Self>, delegate: &DelegateRecord, error: &LdapError) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
        metrics::record_acquisition_failure(&self.name);

        if delegate.mark_offline(error, self.listener.as_ref()) {
            metrics::record_factory_state(&self.name, delegate.index, false);
            self.monitor.ensure_running(self.monitor_tick());
        }
    }

    fn monitor_tick(self: &Arc<Self>) -> Task {
        let weak: Weak<Shared> = Arc::downgrade(self);
        Arc::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.closed.load(Ordering::SeqCst) {
                return;
            }
            let spawner = shared.spawner.clone();
            spawner.spawn(async move {
                probe_offline_delegates(&shared.name, &shared.delegates, shared.listener.as_ref()).await;
                shared.monitor.stop_if_all_online(&shared.delegates);
            });
        })
    }

    fn no_operational_factories(&self, cause: Option<LdapError>) -> LdapError {
        let message = format!(
            "No operational connection factories available for load balancer '{}'",
            self.name
        );
        match cause {
            Some(cause) => LdapError::connect_caused_by(message, cause),
            None => LdapError::connect(message),
        }
    }
}

#[async_trait]
impl ConnectionFactory for HealthMonitoredLoadBalancer {
    async fn get_connection(&self) -> LdapResult<Arc<dyn Connection>> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::SeqCst) {
            return Err(LdapError::connect(format!(
                "Load balancer '{}' is closed",
                shared.name
            )));
        }

        let len = shared.delegates.len();
        let start = shared.selector.initial_index(len);
        let mut last_error = None;

        for offset in 0..len {
            let delegate = &shared.delegates[(start + offset) % len];
            if !delegate.is_online() {
                continue;
            }
            match delegate.factory.get_connection().await {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    tracing::debug!(
                        balancer = %shared.name,
                        factory = delegate.index,
                        error = %error,
                        "Connection attempt failed, trying next factory"
                    );
                    shared.record_failure(delegate, &error);
                    last_error = Some(error);
                }
            }
        }

        // Nothing tried in this call: fall back to the most recent recorded failure.
        let cause = last_error.or_else(|| {
            shared
                .last_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        });
        Err(shared.no_operational_factories(cause))
    }

    fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.monitor.close();
        for delegate in &shared.delegates {
            delegate.factory.close();
        }
        tracing::debug!(balancer = %shared.name, "Load balancer closed");
    }
}

impl std::fmt::Debug for HealthMonitoredLoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let states: Vec<_> = self
            .shared
            .delegates
            .iter()
            .map(|d| (d.index, d.state()))
            .collect();
        f.debug_struct("HealthMonitoredLoadBalancer")
            .field("name", &self.shared.name)
            .field("policy", &self.shared.selector.policy())
            .field("delegates", &states)
            .finish()
    }
}
