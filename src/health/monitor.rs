//! Recovery probing of offline delegates.
//!
//! # Responsibilities
//! - Keep one periodic task alive while at least one delegate is offline
//! - On each tick, try a connection through every offline delegate
//! - Flip delegates back online on success; close the trial connection
//! - Stop the periodic task once every delegate is online again

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;

use crate::health::state::DelegateRecord;
use crate::load_balancer::listener::LoadBalancerEventListener;
use crate::observability::metrics;
use crate::scheduler::{ScheduledTask, Scheduler, Task};

/// Owns the lazily scheduled monitor task of one load balancer.
#[derive(Debug)]
pub struct OfflineMonitor {
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    /// `None` while every delegate is online. The flag records closure.
    task: Mutex<(Option<ScheduledTask>, bool)>,
}

impl OfflineMonitor {
    /// A zero interval disables monitoring.
    pub fn new(scheduler: Arc<dyn Scheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            task: Mutex::new((None, false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Return true while the periodic task is scheduled.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
            .is_some()
    }

    /// Schedule `tick` unless it is already scheduled, disabled, or stopped for good.
    pub fn ensure_running(&self, tick: Task) {
        if !self.is_enabled() {
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let (current, closed) = &mut *task;
        if *closed || current.is_some() {
            return;
        }
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "Starting offline monitor");
        *current = Some(self.scheduler.schedule_at_fixed_rate(self.interval, tick));
    }

    /// Cancel the task if every delegate is online.
    pub fn stop_if_all_online(&self, delegates: &[Arc<DelegateRecord>]) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.0.is_some() && delegates.iter().all(|d| d.is_online()) {
            tracing::debug!("All delegates online, stopping offline monitor");
            if let Some(handle) = task.0.take() {
                handle.cancel();
            }
        }
    }

    /// Cancel the task permanently.
    pub fn close(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        task.1 = true;
        if let Some(handle) = task.0.take() {
            handle.cancel();
        }
    }
}

/// Probe every offline delegate once, concurrently.
///
/// Failures are contained: they refresh the delegate's last error and leave it offline.
pub async fn probe_offline_delegates(
    balancer: &str,
    delegates: &[Arc<DelegateRecord>],
    listener: &dyn LoadBalancerEventListener,
) {
    let probes = delegates
        .iter()
        .filter(|d| !d.is_online() && d.try_begin_probe())
        .map(|delegate| async move {
            match delegate.factory.get_connection().await {
                Ok(connection) => {
                    connection.close();
                    if delegate.mark_online(listener) {
                        metrics::record_factory_state(balancer, delegate.index, true);
                    }
                }
                Err(error) => {
                    tracing::debug!(
                        balancer = %balancer,
                        factory = delegate.index,
                        error = %error,
                        "Offline factory still unavailable"
                    );
                    delegate.mark_offline(&error, listener);
                }
            }
            delegate.end_probe();
        });

    join_all(probes).await;
}
