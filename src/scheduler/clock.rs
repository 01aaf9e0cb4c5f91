//! Injectable time source.

use std::fmt;

use tokio::time::Instant;

/// Monotonic time source.
///
/// Heartbeat bookkeeping reads time only through this trait so tests can
/// control it.
pub trait TimeService: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Time service backed by the Tokio clock.
///
/// Follows `tokio::time::pause`/`advance`, which keeps it in step with the
/// timers driving [`TokioScheduler`](crate::scheduler::TokioScheduler).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl TimeService for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
