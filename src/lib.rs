//! Connection resilience for directory (LDAP) clients.
//!
//! # Architecture Overview
//!
//! ```text
//!   application
//!       │ get_connection() / execute(request)
//!       ▼
//!   ┌───────────────────────────────┐      ┌──────────────────────┐
//!   │ load_balancer                 │      │ health               │
//!   │  RoutedLoadBalancer           │      │  delegate state      │
//!   │  HealthMonitoredLoadBalancer  │◀────▶│  offline monitor     │
//!   └──────────────┬────────────────┘      └──────────┬───────────┘
//!                  │ one delegate per server          │
//!                  ▼                                  │
//!   ┌───────────────────────────────┐                 │
//!   │ heartbeat                     │                 │
//!   │  HeartbeatConnectionFactory   │◀──────┐         │
//!   │  HeartbeatConnection          │       │         │
//!   └──────────────┬────────────────┘  ┌────┴─────────┴──┐
//!                  │                   │ scheduler        │
//!                  ▼                   │  periodic ticks  │
//!        transport ConnectionFactory   └─────────────────┘
//! ```
//!
//! Every layer implements [`ConnectionFactory`](connection::ConnectionFactory),
//! so balancers and heartbeat wrappers compose by wrapping one another.

// Capabilities and shared infrastructure
pub mod connection;
pub mod scheduler;

// Resilience strategies
pub mod health;
pub mod heartbeat;
pub mod load_balancer;

// Cross-cutting concerns
pub mod config;
pub mod observability;

pub use config::ResilienceConfig;
pub use connection::{Connection, ConnectionEventListener, ConnectionFactory, LdapError, LdapResult, Request, Response};
pub use heartbeat::{HeartbeatConnectionFactory, HeartbeatOptions};
pub use load_balancer::{
    new_affinity_load_balancer, new_failover_load_balancer, new_round_robin_load_balancer,
    HealthMonitoredLoadBalancer, LoadBalancerEventListener, LoadBalancerOptions, RoutedLoadBalancer,
};
