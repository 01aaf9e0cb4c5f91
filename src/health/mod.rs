//! Delegate health tracking for the health-monitored load balancer.
//!
//! # Data Flow
//! ```text
//! Passive detection (load_balancer/monitored.rs):
//!     Acquisition through a delegate fails
//!     → state.rs marks it Offline, listener notified
//!     → monitor.rs schedules the recovery task (first offline delegate only)
//!
//! Active recovery (monitor.rs):
//!     Periodic tick
//!     → Trial connection through each Offline delegate
//!     → Success: state.rs marks it Online, listener notified, trial closed
//!     → All Online: recovery task cancelled
//! ```
//!
//! # Design Decisions
//! - A single failure takes a delegate offline; a single probe brings it back
//! - Probe failures never escape the scheduler
//! - No timer runs while every delegate is healthy

pub mod monitor;
pub mod state;
