//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! load_balancer, health, heartbeat produce:
//!     → tracing events (transitions, timeouts, probe failures)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, filtered by RUST_LOG)
//!     → Prometheus exporter (optional scrape endpoint)
//! ```
//!
//! # Design Decisions
//! - The library only emits; installing a subscriber or exporter is the application's call
//! - Metric updates are no-ops until a recorder is installed
//! - Per-delegate gauges are labelled by balancer name and delegate index

pub mod logging;
pub mod metrics;
