//! Heartbeat connection factory and idle-detection scheduling.
//!
//! # Responsibilities
//! - Validate new connections with an initial heartbeat
//! - Keep a registry of live heartbeat connections
//! - Run the idle tick while at least one connection is registered
//! - Check deadlines one timeout after heartbeats were sent or binds were found pending

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::connection::{Connection, ConnectionFactory, ConnectionId, LdapError, LdapResult, Request, SearchRequest};
use crate::heartbeat::connection::{HeartbeatConnection, HeartbeatInner};
use crate::heartbeat::HeartbeatOptions;
use crate::scheduler::{ScheduledTask, Scheduler, Spawner, Task, TimeService, TokioClock, TokioScheduler};

/// Settings shared by the factory and every connection it produced.
pub(crate) struct HeartbeatSettings {
    pub(crate) interval: Duration,
    pub(crate) timeout: Duration,
    pub(crate) request: SearchRequest,
    pub(crate) clock: Arc<dyn TimeService>,
    pub(crate) spawner: Spawner,
}

impl HeartbeatSettings {
    /// Idle time after which a connection is due a heartbeat.
    ///
    /// Half the interval, so a heartbeat answered with some latency is still
    /// due again on the next tick.
    pub(crate) fn min_delay(&self) -> Duration {
        self.interval / 2
    }
}

pub(crate) struct FactoryShared {
    delegate: Arc<dyn ConnectionFactory>,
    settings: Arc<HeartbeatSettings>,
    scheduler: Arc<dyn Scheduler>,
    connections: DashMap<ConnectionId, Weak<HeartbeatInner>>,
    /// The idle tick. `None` while no connection is registered.
    ticker: Mutex<Option<ScheduledTask>>,
    closed: AtomicBool,
}

/// Factory whose connections are kept alive, and checked, by heartbeats.
pub struct HeartbeatConnectionFactory {
    shared: Arc<FactoryShared>,
}

impl HeartbeatConnectionFactory {
    /// Wrap `delegate` with default settings: 10 s interval, 3 s timeout, root DSE probe.
    pub fn new(delegate: Arc<dyn ConnectionFactory>) -> Self {
        Self::with_options(delegate, HeartbeatOptions::default())
    }

    pub fn with_options(delegate: Arc<dyn ConnectionFactory>, options: HeartbeatOptions) -> Self {
        let scheduler = options
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new()));
        let clock = options.time_service.unwrap_or_else(|| Arc::new(TokioClock));

        tracing::debug!(
            interval_ms = options.interval.as_millis() as u64,
            timeout_ms = options.timeout.as_millis() as u64,
            "Heartbeat connection factory created"
        );

        Self {
            shared: Arc::new(FactoryShared {
                delegate,
                settings: Arc::new(HeartbeatSettings {
                    interval: options.interval,
                    timeout: options.timeout,
                    request: options.request,
                    clock,
                    spawner: Spawner::current(),
                }),
                scheduler,
                connections: DashMap::new(),
                ticker: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of open connections produced by this factory.
    pub fn active_connections(&self) -> usize {
        self.shared.connections.len()
    }

    /// Return true while the idle tick is scheduled.
    pub fn is_ticking(&self) -> bool {
        self.shared
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn interval(&self) -> Duration {
        self.shared.settings.interval
    }

    pub fn timeout(&self) -> Duration {
        self.shared.settings.timeout
    }
}

#[async_trait]
impl ConnectionFactory for HeartbeatConnectionFactory {
    async fn get_connection(&self) -> LdapResult<Arc<dyn Connection>> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::SeqCst) {
            return Err(LdapError::connect("Heartbeat connection factory is closed"));
        }

        let raw = shared.delegate.get_connection().await?;
        let settings = &shared.settings;

        let probe = raw.execute(Request::Search(settings.request.clone()));
        let outcome = match tokio::time::timeout(settings.timeout, probe).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(LdapError::heartbeat_timeout(settings.timeout)),
        };

        if let Err(error) = outcome {
            tracing::debug!(error = %error, "Initial heartbeat failed");
            raw.close();
            return Err(LdapError::connect_caused_by("Initial heartbeat failed", error));
        }

        let connection = HeartbeatConnection::new(
            raw,
            Arc::clone(settings),
            Arc::downgrade(shared),
            settings.clock.now(),
        );
        shared.register(connection.inner());
        Ok(Arc::new(connection))
    }

    fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ticker) = shared.ticker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            ticker.cancel();
        }
        shared.delegate.close();
        tracing::debug!("Heartbeat connection factory closed");
    }
}

impl std::fmt::Debug for HeartbeatConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatConnectionFactory")
            .field("delegate", &self.shared.delegate)
            .field("interval", &self.shared.settings.interval)
            .field("timeout", &self.shared.settings.timeout)
            .field("connections", &self.shared.connections.len())
            .finish()
    }
}

impl FactoryShared {
    fn register(self: &Arc<Self>, inner: &Arc<HeartbeatInner>) {
        self.connections.insert(inner.id(), Arc::downgrade(inner));

        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_none() && !self.closed.load(Ordering::SeqCst) {
            tracing::debug!(interval_ms = self.settings.interval.as_millis() as u64, "Starting heartbeat tick");
            *ticker = Some(
                self.scheduler
                    .schedule_at_fixed_rate(self.settings.interval, self.idle_tick()),
            );
        }
    }

    pub(crate) fn deregister(&self, id: ConnectionId) {
        self.connections.remove(&id);
        self.stop_if_idle();
    }

    fn stop_if_idle(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if self.connections.is_empty() {
            if let Some(task) = ticker.take() {
                tracing::debug!("No heartbeat connections left, stopping heartbeat tick");
                task.cancel();
            }
        }
    }

    fn idle_tick(self: &Arc<Self>) -> Task {
        let weak = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.send_heartbeats();
            }
        })
    }

    /// Snapshot of registered connections. Dropped connections are pruned.
    fn live_connections(&self) -> Vec<Arc<HeartbeatInner>> {
        let mut pruned = false;
        self.connections.retain(|_, weak| {
            let alive = weak.strong_count() > 0;
            pruned |= !alive;
            alive
        });
        if pruned {
            self.stop_if_idle();
        }
        self.connections
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    fn send_heartbeats(self: &Arc<Self>) {
        let now = self.settings.clock.now();
        let mut armed = false;

        for connection in self.live_connections() {
            connection.check_deadline(now);
            armed |= connection.try_send_heartbeat(now);
        }

        if armed {
            let weak = Arc::downgrade(self);
            self.scheduler.schedule_once(
                self.settings.timeout,
                Box::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.check_deadlines();
                    }
                }),
            );
        }
    }

    fn check_deadlines(&self) {
        let now = self.settings.clock.now();
        for connection in self.live_connections() {
            connection.check_deadline(now);
        }
    }
}
