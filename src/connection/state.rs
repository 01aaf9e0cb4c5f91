//! Connection lifecycle state and listener registry.
//!
//! # States
//! - Valid: requests are forwarded
//! - Invalid: an unrecoverable error was observed, requests fail fast
//! - Closed: the application released the connection
//!
//! # State Transitions
//! ```text
//! Valid → Invalid: first connection error (listeners notified once)
//! Valid | Invalid → Closed: first close (listeners notified once, then dropped)
//! ```
//!
//! Listeners are notified from a snapshot taken under the lock, never while
//! holding it, so a listener may call back into the connection.

use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::{same_listener, ConnectionEventListener, LdapError};

#[derive(Debug, Clone)]
enum Lifecycle {
    Valid,
    Invalid(LdapError),
    Closed(Option<LdapError>),
}

struct Inner {
    lifecycle: Lifecycle,
    listeners: Vec<Arc<dyn ConnectionEventListener>>,
}

/// Tracks the lifecycle of one connection and the listeners interested in it.
pub struct ConnectionStateTracker {
    inner: Mutex<Inner>,
}

impl ConnectionStateTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Valid,
                listeners: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return true while no error has been seen and the connection is open.
    pub fn is_valid(&self) -> bool {
        matches!(self.lock().lifecycle, Lifecycle::Valid)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.lock().lifecycle, Lifecycle::Closed(_))
    }

    /// The error that invalidated the connection, if any.
    pub fn connection_error(&self) -> Option<LdapError> {
        match &self.lock().lifecycle {
            Lifecycle::Valid => None,
            Lifecycle::Invalid(error) => Some(error.clone()),
            Lifecycle::Closed(error) => error.clone(),
        }
    }

    /// Register a listener.
    ///
    /// A listener added after the connection failed or closed is told about it immediately.
    pub fn add_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        let lifecycle = {
            let mut inner = self.lock();
            match inner.lifecycle {
                Lifecycle::Closed(_) => {}
                _ => {
                    if !inner.listeners.iter().any(|l| same_listener(l, &listener)) {
                        inner.listeners.push(listener.clone());
                    }
                }
            }
            inner.lifecycle.clone()
        };

        match lifecycle {
            Lifecycle::Valid => {}
            Lifecycle::Invalid(error) => listener.handle_connection_error(false, &error),
            Lifecycle::Closed(_) => listener.handle_connection_closed(),
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.lock().listeners.retain(|l| !same_listener(l, listener));
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Move to Invalid. Returns false if the connection was already invalid or closed.
    pub fn notify_connection_error(&self, is_disconnect_notification: bool, error: &LdapError) -> bool {
        let snapshot = {
            let mut inner = self.lock();
            if !matches!(inner.lifecycle, Lifecycle::Valid) {
                return false;
            }
            inner.lifecycle = Lifecycle::Invalid(error.clone());
            inner.listeners.clone()
        };

        for listener in snapshot {
            listener.handle_connection_error(is_disconnect_notification, error);
        }
        true
    }

    /// Move to Closed. Returns false if the connection was already closed.
    pub fn notify_connection_closed(&self) -> bool {
        let listeners = {
            let mut inner = self.lock();
            let error = match &inner.lifecycle {
                Lifecycle::Closed(_) => return false,
                Lifecycle::Valid => None,
                Lifecycle::Invalid(error) => Some(error.clone()),
            };
            inner.lifecycle = Lifecycle::Closed(error);
            std::mem::take(&mut inner.listeners)
        };

        for listener in listeners {
            listener.handle_connection_closed();
        }
        true
    }
}

impl Default for ConnectionStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ConnectionStateTracker")
            .field("lifecycle", &inner.lifecycle)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}
