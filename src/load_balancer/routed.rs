//! Request-routed load balancer.
//!
//! # Responsibilities
//! - Map each request to a start delegate through a [`RoutingFunction`]
//! - Fail over by linear probing until a delegate produces a connection
//! - Report the error of the last delegate tried when all of them fail
//!
//! The balancer keeps no per-delegate state and schedules nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::{
    Connection, ConnectionEventListener, ConnectionFactory, ConnectionId, ConnectionStateTracker, LdapError,
    LdapResult, Request, Response,
};
use crate::load_balancer::routing::RoutingFunction;
use crate::observability::metrics;

/// Load balancer choosing a delegate per request.
pub struct RoutedLoadBalancer {
    name: String,
    delegates: Vec<Arc<dyn ConnectionFactory>>,
    routing: Arc<dyn RoutingFunction>,
    /// Shared with every routing connection handed out.
    closed: Arc<AtomicBool>,
}

impl RoutedLoadBalancer {
    pub fn new(
        name: impl Into<String>,
        delegates: Vec<Arc<dyn ConnectionFactory>>,
        routing: Arc<dyn RoutingFunction>,
    ) -> Self {
        Self {
            name: name.into(),
            delegates,
            routing,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delegates(&self) -> &[Arc<dyn ConnectionFactory>] {
        &self.delegates
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> LdapError {
        LdapError::connect(format!("Load balancer '{}' is closed", self.name))
    }

    fn share(&self) -> Self {
        Self {
            name: self.name.clone(),
            delegates: self.delegates.clone(),
            routing: Arc::clone(&self.routing),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Start index for `request`.
    pub fn partition_for(&self, request: &Request) -> usize {
        let len = self.delegates.len();
        if len == 0 {
            return 0;
        }
        self.routing.route(request, len) % len
    }

    /// Acquire a delegate connection suitable for `request`.
    pub async fn get_connection_for(&self, request: &Request) -> LdapResult<Arc<dyn Connection>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let len = self.delegates.len();
        let start = self.partition_for(request);
        let mut last_error = None;

        for offset in 0..len {
            let index = (start + offset) % len;
            match self.delegates[index].get_connection().await {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    tracing::debug!(
                        balancer = %self.name,
                        factory = index,
                        operation = request.operation_name(),
                        error = %error,
                        "Connection attempt failed, probing next factory"
                    );
                    last_error = Some(error);
                }
            }
        }

        metrics::record_acquisition_failure(&self.name);
        let message = format!(
            "No operational connection factories available for load balancer '{}'",
            self.name
        );
        Err(match last_error {
            Some(cause) => LdapError::connect_caused_by(message, cause),
            None => LdapError::connect(message),
        })
    }
}

#[async_trait]
impl ConnectionFactory for RoutedLoadBalancer {
    /// Return a connection that routes each request on its own. No delegate is contacted yet.
    async fn get_connection(&self) -> LdapResult<Arc<dyn Connection>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(Arc::new(RequestRoutingConnection {
            id: ConnectionId::new(),
            balancer: self.share(),
            state: ConnectionStateTracker::new(),
        }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for delegate in &self.delegates {
            delegate.close();
        }
        tracing::debug!(balancer = %self.name, "Load balancer closed");
    }
}

impl std::fmt::Debug for RoutedLoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedLoadBalancer")
            .field("name", &self.name)
            .field("delegates", &self.delegates)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes a delegate connection when dropped, including when the request is cancelled.
struct CloseOnDrop(Arc<dyn Connection>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Connection returned by [`RoutedLoadBalancer`].
///
/// Every request acquires a delegate connection, runs on it, and closes it.
/// An acquisition failure invalidates this connection.
pub struct RequestRoutingConnection {
    id: ConnectionId,
    balancer: RoutedLoadBalancer,
    state: ConnectionStateTracker,
}

impl RequestRoutingConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

#[async_trait]
impl Connection for RequestRoutingConnection {
    async fn execute(&self, request: Request) -> LdapResult<Response> {
        if let Request::Abandon { .. } = request {
            return Ok(Response::success());
        }
        if self.state.is_closed() {
            return Err(LdapError::closed_by_client());
        }
        if let Some(error) = self.state.connection_error() {
            return Err(error);
        }

        let connection = match self.balancer.get_connection_for(&request).await {
            Ok(connection) => CloseOnDrop(connection),
            Err(error) => {
                self.state.notify_connection_error(false, &error);
                return Err(error);
            }
        };

        connection.0.execute(request).await
    }

    fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn close(&self) {
        if self.state.notify_connection_closed() {
            tracing::trace!(connection = %self.id, "Routing connection closed");
        }
    }

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.state.add_listener(listener);
    }

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.state.remove_listener(listener);
    }
}

impl std::fmt::Debug for RequestRoutingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRoutingConnection")
            .field("id", &self.id)
            .field("balancer", &self.balancer.name)
            .field("state", &self.state)
            .finish()
    }
}
