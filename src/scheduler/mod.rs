//! Periodic task execution shared by the health monitor and the heartbeat prober.
//!
//! # Data Flow
//! ```text
//! HealthMonitoredLoadBalancer (first delegate offline)
//!     → Scheduler::schedule_at_fixed_rate(monitoring_interval, probe_offline)
//! HeartbeatConnectionFactory (first live connection)
//!     → Scheduler::schedule_at_fixed_rate(interval, send_heartbeats)
//!     → Scheduler::schedule_once(timeout, check_deadlines)
//!
//! ScheduledTask::cancel()  → stops one task
//! TokioScheduler::shutdown() → stops every task it spawned
//! ```
//!
//! # Design Decisions
//! - Tasks are plain synchronous closures; network work is spawned from them
//!   onto the runtime captured when their owner was built
//! - The first run happens one full period after scheduling
//! - A panicking or slow task never blocks other tasks (one Tokio task each)

pub mod clock;
pub mod shutdown;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub use clock::{TimeService, TokioClock};
pub use shutdown::Shutdown;

/// A task run repeatedly by a scheduler.
pub type Task = Arc<dyn Fn() + Send + Sync>;

/// A task run once by a scheduler.
pub type OnceTask = Box<dyn FnOnce() + Send>;

/// Periodic task execution substrate.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Run `task` every `period`, starting one period from now.
    fn schedule_at_fixed_rate(&self, period: Duration, task: Task) -> ScheduledTask;

    /// Run `task` once after `delay`.
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> ScheduledTask;
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl ScheduledTask {
    /// A handle whose task will never run.
    pub fn cancelled() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(true)),
            abort: None,
        }
    }

    fn new(cancelled: Arc<AtomicBool>, abort: AbortHandle) -> Self {
        Self {
            cancelled,
            abort: Some(abort),
        }
    }

    /// Stop the task. A run already in progress completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Spawns background work onto the runtime that was current at construction.
///
/// Scheduled tasks may run on threads outside any runtime, so work they start
/// goes through a handle captured up front.
#[derive(Debug, Clone)]
pub(crate) struct Spawner {
    handle: Option<Handle>,
}

impl Spawner {
    /// Bind to the current runtime, if there is one.
    ///
    /// Without a current runtime the runtime is looked up again on each spawn.
    pub(crate) fn current() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    pub(crate) fn with_handle(handle: Handle) -> Self {
        Self { handle: Some(handle) }
    }

    pub(crate) fn runtime(&self) -> Option<Handle> {
        match &self.handle {
            Some(handle) => Some(handle.clone()),
            None => Handle::try_current().ok(),
        }
    }

    /// Run `future` in the background. Returns false if no runtime was available.
    pub(crate) fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.runtime() {
            Some(runtime) => {
                runtime.spawn(future);
                true
            }
            None => {
                tracing::error!("No Tokio runtime available, background work dropped");
                false
            }
        }
    }
}

/// Scheduler spawning one Tokio task per scheduled task.
#[derive(Debug)]
pub struct TokioScheduler {
    spawner: Spawner,
    shutdown: Shutdown,
}

impl TokioScheduler {
    /// Create a scheduler bound to the current runtime, if there is one.
    ///
    /// Without a current runtime the runtime is looked up again each time a task is scheduled.
    pub fn new() -> Self {
        Self {
            spawner: Spawner::current(),
            shutdown: Shutdown::new(),
        }
    }

    /// Create a scheduler spawning onto `handle`.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            spawner: Spawner::with_handle(handle),
            shutdown: Shutdown::new(),
        }
    }

    /// Stop every task spawned by this scheduler. Later schedules are ignored.
    pub fn shutdown(&self) {
        tracing::debug!("Scheduler shutting down");
        self.shutdown.trigger();
    }

    fn runtime(&self) -> Option<Handle> {
        self.spawner.runtime()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_at_fixed_rate(&self, period: Duration, task: Task) -> ScheduledTask {
        if self.shutdown.is_triggered() || period.is_zero() {
            return ScheduledTask::cancelled();
        }
        let Some(runtime) = self.runtime() else {
            tracing::error!("No Tokio runtime available, periodic task not scheduled");
            return ScheduledTask::cancelled();
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let mut shutdown = self.shutdown.subscribe();

        let join = runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if flag.load(Ordering::SeqCst) {
                            break;
                        }
                        task();
                    }
                    _ = shutdown.recv() => {
                        break;
                    }
                }
            }
        });

        ScheduledTask::new(cancelled, join.abort_handle())
    }

    fn schedule_once(&self, delay: Duration, task: OnceTask) -> ScheduledTask {
        if self.shutdown.is_triggered() {
            return ScheduledTask::cancelled();
        }
        let Some(runtime) = self.runtime() else {
            tracing::error!("No Tokio runtime available, one-shot task not scheduled");
            return ScheduledTask::cancelled();
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let mut shutdown = self.shutdown.subscribe();

        let join = runtime.spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    if !flag.load(Ordering::SeqCst) {
                        task();
                    }
                }
                _ = shutdown.recv() => {}
            }
        });

        ScheduledTask::new(cancelled, join.abort_handle())
    }
}
