//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → HeartbeatOptions / LoadBalancerOptions for the factories
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Schedulers, clocks and event listeners are code, never configuration

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{Algorithm, HeartbeatConfig, LoadBalancerConfig, ObservabilityConfig, ResilienceConfig};
pub use validation::{validate_config, ValidationError};
