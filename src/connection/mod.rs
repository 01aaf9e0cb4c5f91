//! Connection capabilities consumed and produced by the resilience layer.
//!
//! # Data Flow
//! ```text
//! application
//!     → ConnectionFactory::get_connection()   (load balancer / heartbeat / transport)
//!     → Connection::execute(Request)          (flows through wrappers to the wire)
//!     ← Response | LdapError
//!
//! connection failure:
//!     transport error / heartbeat timeout
//!     → ConnectionStateTracker (VALID → INVALID)
//!     → ConnectionEventListener::handle_connection_error
//! ```
//!
//! # Design Decisions
//! - Every factory flavour satisfies the same trait, so wrappers compose freely
//! - Connections are shared as `Arc<dyn Connection>`; `close()` is idempotent
//! - Non-success server results are returned as `LdapError::Result`
//! - Lifecycle only moves forward: VALID → INVALID → CLOSED

pub mod error;
pub mod id;
pub mod request;
pub mod state;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub use error::{LdapError, LdapResult, ResultCode};
pub use id::ConnectionId;
pub use request::{BindRequest, Dn, Request, Response, SearchRequest, SearchScope};
pub use state::ConnectionStateTracker;

/// A connection to a directory server.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Send a request and wait for its final result.
    async fn execute(&self, request: Request) -> LdapResult<Response>;

    /// Return true if the connection can still be used for requests.
    fn is_valid(&self) -> bool;

    /// Return true once `close()` has been called.
    fn is_closed(&self) -> bool;

    /// Release the connection. Calling this more than once has no further effect.
    fn close(&self);

    /// Register a listener for error and close events.
    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>);

    /// Remove a previously registered listener.
    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>);

    async fn bind(&self, request: BindRequest) -> LdapResult<Response> {
        self.execute(Request::Bind(request)).await
    }

    async fn start_tls(&self) -> LdapResult<Response> {
        self.execute(Request::StartTls).await
    }

    async fn search(&self, request: SearchRequest) -> LdapResult<Response> {
        self.execute(Request::Search(request)).await
    }

    async fn delete(&self, name: &str) -> LdapResult<Response> {
        self.execute(Request::Delete {
            name: name.to_string(),
        })
        .await
    }
}

/// Produces connections. Implemented by transports, heartbeat wrappers and load balancers.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + fmt::Debug {
    /// Obtain a usable connection.
    async fn get_connection(&self) -> LdapResult<Arc<dyn Connection>>;

    /// Release resources held by the factory.
    fn close(&self);
}

/// Receives connection lifecycle notifications.
pub trait ConnectionEventListener: Send + Sync {
    /// The connection was closed by the application.
    fn handle_connection_closed(&self);

    /// The connection became unusable.
    fn handle_connection_error(&self, is_disconnect_notification: bool, error: &LdapError);
}

/// Compare two listeners by identity.
pub(crate) fn same_listener(
    a: &Arc<dyn ConnectionEventListener>,
    b: &Arc<dyn ConnectionEventListener>,
) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
