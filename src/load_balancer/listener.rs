//! Load balancer event notifications.

use std::sync::Arc;

use crate::connection::{ConnectionFactory, LdapError};

/// Notified when a delegate factory changes availability.
///
/// For a given factory, offline and online notifications strictly alternate,
/// starting with offline.
pub trait LoadBalancerEventListener: Send + Sync {
    /// The factory could not produce a connection and is no longer used.
    fn handle_connection_factory_offline(&self, factory: &Arc<dyn ConnectionFactory>, error: &LdapError);

    /// A monitor probe succeeded and the factory is used again.
    fn handle_connection_factory_online(&self, factory: &Arc<dyn ConnectionFactory>);
}

/// Default listener: logs transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl LoadBalancerEventListener for LogEvents {
    fn handle_connection_factory_offline(&self, factory: &Arc<dyn ConnectionFactory>, error: &LdapError) {
        tracing::warn!(factory = ?factory, error = %error, "Connection factory is no longer operational");
    }

    fn handle_connection_factory_online(&self, factory: &Arc<dyn ConnectionFactory>) {
        tracing::info!(factory = ?factory, "Connection factory is now operational");
    }
}
