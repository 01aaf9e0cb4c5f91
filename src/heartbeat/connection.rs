//! Heartbeat-wrapped connection.
//!
//! # State
//! Each connection owns one [`HeartbeatState`] guarded by a mutex:
//! - `last_activity`: time of the last response proving the server alive
//! - `pending_security_ops`: binds / StartTLS currently on the wire
//! - `security_sent_at`: when the latest of those was sent
//! - `in_flight`: the outstanding heartbeat, if any
//! - `queued`: binds / StartTLS waiting for that heartbeat to settle
//!
//! At most one of {heartbeat, security-sensitive exchange} is outstanding at a
//! time. Heartbeats yield to pending binds; binds wait for an in-flight heartbeat.
//! A pending bind stands in for the heartbeat and is held to the same deadline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::connection::{
    Connection, ConnectionEventListener, ConnectionId, ConnectionStateTracker, LdapError, LdapResult, Request,
    Response,
};
use crate::heartbeat::factory::{FactoryShared, HeartbeatSettings};
use crate::observability::metrics;

type QueuedSecurityOp = oneshot::Sender<LdapResult<SecurityPermit>>;

#[derive(Debug, Clone, Copy)]
struct InFlightHeartbeat {
    token: u64,
    sent_at: Instant,
}

struct HeartbeatState {
    last_activity: Instant,
    pending_security_ops: usize,
    security_sent_at: Instant,
    in_flight: Option<InFlightHeartbeat>,
    queued: VecDeque<QueuedSecurityOp>,
    next_token: u64,
}

impl HeartbeatState {
    /// Send time of the outstanding liveness-relevant exchange, if any.
    fn outstanding_since(&self) -> Option<Instant> {
        match self.in_flight {
            Some(in_flight) => Some(in_flight.sent_at),
            None if self.pending_security_ops > 0 => Some(self.security_sent_at),
            None => None,
        }
    }

    fn grant_security_slot(&mut self, now: Instant) {
        self.pending_security_ops += 1;
        self.security_sent_at = now;
    }
}

/// Connection whose liveness is checked by heartbeats while it is idle.
pub struct HeartbeatConnection {
    inner: Arc<HeartbeatInner>,
}

pub(crate) struct HeartbeatInner {
    id: ConnectionId,
    raw: Arc<dyn Connection>,
    settings: Arc<HeartbeatSettings>,
    state: ConnectionStateTracker,
    heartbeat: Mutex<HeartbeatState>,
    /// Holds the error that released in-flight requests, once there is one.
    failure: watch::Sender<Option<LdapError>>,
    relay: Mutex<Option<Arc<dyn ConnectionEventListener>>>,
    factory: Weak<FactoryShared>,
}

/// Slot held by a security-sensitive request while it is on the wire.
pub(crate) struct SecurityPermit {
    inner: Arc<HeartbeatInner>,
}

impl Drop for SecurityPermit {
    fn drop(&mut self) {
        let mut heartbeat = self.inner.lock_heartbeat();
        heartbeat.pending_security_ops = heartbeat.pending_security_ops.saturating_sub(1);
    }
}

/// Forwards events of the raw connection to the wrapper.
struct RelayListener {
    inner: Weak<HeartbeatInner>,
}

impl ConnectionEventListener for RelayListener {
    fn handle_connection_closed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            if !inner.state.is_closed() {
                inner.invalidate(true, LdapError::server_down("Underlying connection closed"));
            }
        }
    }

    fn handle_connection_error(&self, is_disconnect_notification: bool, error: &LdapError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.invalidate(
                is_disconnect_notification,
                LdapError::server_down_caused_by("Connection failed", error.clone()),
            );
        }
    }
}

impl HeartbeatConnection {
    /// Wrap `raw`, whose initial heartbeat completed at `last_activity`.
    pub(crate) fn new(
        raw: Arc<dyn Connection>,
        settings: Arc<HeartbeatSettings>,
        factory: Weak<FactoryShared>,
        last_activity: Instant,
    ) -> Self {
        let (failure, _) = watch::channel(None);
        let inner = Arc::new(HeartbeatInner {
            id: ConnectionId::new(),
            raw,
            settings,
            state: ConnectionStateTracker::new(),
            heartbeat: Mutex::new(HeartbeatState {
                last_activity,
                pending_security_ops: 0,
                security_sent_at: last_activity,
                in_flight: None,
                queued: VecDeque::new(),
                next_token: 0,
            }),
            failure,
            relay: Mutex::new(None),
            factory,
        });

        let relay: Arc<dyn ConnectionEventListener> = Arc::new(RelayListener {
            inner: Arc::downgrade(&inner),
        });
        *inner.relay.lock().unwrap_or_else(PoisonError::into_inner) = Some(relay.clone());
        inner.raw.add_connection_event_listener(relay);

        Self { inner }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub(crate) fn inner(&self) -> &Arc<HeartbeatInner> {
        &self.inner
    }

    /// Return true while a heartbeat is outstanding.
    pub fn is_heartbeat_in_flight(&self) -> bool {
        self.inner.lock_heartbeat().in_flight.is_some()
    }

    /// Time of the last response that proved the server alive.
    pub fn last_activity(&self) -> Instant {
        self.inner.lock_heartbeat().last_activity
    }
}

#[async_trait]
impl Connection for HeartbeatConnection {
    async fn execute(&self, request: Request) -> LdapResult<Response> {
        self.inner.check_usable()?;

        if request.is_security_sensitive() {
            let permit = self.inner.acquire_security_permit().await?;
            let result = self.inner.dispatch(request).await;
            // The outcome of a bind is liveness evidence, just like a heartbeat.
            self.inner.record_response(&result);
            drop(permit);
            result
        } else {
            let result = self.inner.dispatch(request).await;
            self.inner.record_response(&result);
            result
        }
    }

    fn is_valid(&self) -> bool {
        self.inner.state.is_valid() && self.inner.raw.is_valid()
    }

    fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.inner.state.add_listener(listener);
    }

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.inner.state.remove_listener(listener);
    }
}

impl std::fmt::Debug for HeartbeatConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatConnection")
            .field("id", &self.inner.id)
            .field("raw", &self.inner.raw)
            .field("state", &self.inner.state)
            .finish()
    }
}

impl HeartbeatInner {
    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    fn lock_heartbeat(&self) -> MutexGuard<'_, HeartbeatState> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_usable(&self) -> LdapResult<()> {
        if self.state.is_closed() {
            return Err(LdapError::closed_by_client());
        }
        match self.state.connection_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Run `request` on the raw connection, giving up as soon as this connection fails.
    async fn dispatch(&self, request: Request) -> LdapResult<Response> {
        let mut failure = self.failure.subscribe();
        if let Some(error) = failure.borrow_and_update().as_ref().cloned() {
            return Err(error);
        }

        tokio::select! {
            result = self.raw.execute(request) => result,
            error = wait_for_failure(&mut failure) => Err(error),
        }
    }

    /// Reset the idle timer if the server answered.
    fn record_response(&self, result: &LdapResult<Response>) {
        let answered = match result {
            Ok(_) => true,
            Err(error) => !error.is_connection_error(),
        };
        if answered {
            let now = self.settings.clock.now();
            self.lock_heartbeat().last_activity = now;
        }
    }

    /// Wait until no heartbeat is in flight, then take a security slot.
    async fn acquire_security_permit(self: &Arc<Self>) -> LdapResult<SecurityPermit> {
        let receiver = {
            let mut heartbeat = self.lock_heartbeat();
            if let Some(error) = self.failure.borrow().as_ref().cloned() {
                return Err(error);
            }
            if heartbeat.in_flight.is_none() {
                heartbeat.grant_security_slot(self.settings.clock.now());
                return Ok(SecurityPermit { inner: Arc::clone(self) });
            }
            let (sender, receiver) = oneshot::channel();
            heartbeat.queued.push_back(sender);
            receiver
        };

        tracing::debug!(connection = %self.id, "Security-sensitive request queued behind heartbeat");
        receiver.await.unwrap_or_else(|_| Err(LdapError::closed_by_client()))
    }

    /// Hand a permit to every queued request. Permits that could not be delivered are returned.
    fn release_queued(self: &Arc<Self>, heartbeat: &mut HeartbeatState) -> Vec<SecurityPermit> {
        let mut undelivered = Vec::new();
        let now = self.settings.clock.now();
        while let Some(sender) = heartbeat.queued.pop_front() {
            heartbeat.grant_security_slot(now);
            let permit = SecurityPermit { inner: Arc::clone(self) };
            if let Err(Ok(permit)) = sender.send(Ok(permit)) {
                undelivered.push(permit);
            }
        }
        undelivered
    }

    fn fail_queued(&self, error: &LdapError) {
        let queued = std::mem::take(&mut self.lock_heartbeat().queued);
        for sender in queued {
            let _ = sender.send(Err(error.clone()));
        }
    }

    /// Send a heartbeat if the connection is due one.
    ///
    /// Returns true if a deadline check is needed: either a heartbeat was sent,
    /// or a pending bind is standing in for it.
    pub(crate) fn try_send_heartbeat(self: &Arc<Self>, now: Instant) -> bool {
        if !self.state.is_valid() || !self.raw.is_valid() {
            return false;
        }

        let token = {
            let mut heartbeat = self.lock_heartbeat();
            if now.saturating_duration_since(heartbeat.last_activity) < self.settings.min_delay() {
                return false;
            }
            if heartbeat.in_flight.is_some() {
                return false;
            }
            if heartbeat.pending_security_ops > 0 {
                tracing::trace!(connection = %self.id, "Heartbeat skipped, bind pending");
                return true;
            }
            if !heartbeat.queued.is_empty() {
                return false;
            }
            heartbeat.next_token += 1;
            let token = heartbeat.next_token;
            heartbeat.in_flight = Some(InFlightHeartbeat { token, sent_at: now });
            token
        };

        metrics::record_heartbeat_sent();
        tracing::trace!(connection = %self.id, "Sending heartbeat");

        let inner = Arc::clone(self);
        self.settings.spawner.spawn(async move {
            let result = inner.dispatch(Request::Search(inner.settings.request.clone())).await;
            inner.heartbeat_settled(token, result);
        })
    }

    fn heartbeat_settled(self: &Arc<Self>, token: u64, result: LdapResult<Response>) {
        if self.state.is_closed() {
            return;
        }

        let (failed, undelivered) = {
            let mut heartbeat = self.lock_heartbeat();
            match heartbeat.in_flight {
                Some(in_flight) if in_flight.token == token => heartbeat.in_flight = None,
                _ => return,
            }
            match result {
                Err(error) if error.is_connection_error() => (Some(error), Vec::new()),
                _ => {
                    heartbeat.last_activity = self.settings.clock.now();
                    (None, self.release_queued(&mut heartbeat))
                }
            }
        };
        drop(undelivered);

        if let Some(error) = failed {
            tracing::warn!(connection = %self.id, error = %error, "Heartbeat failed");
            self.invalidate(false, LdapError::server_down_caused_by("Heartbeat failed", error));
        }
    }

    /// Invalidate the connection if its heartbeat, or the bind standing in for it,
    /// missed the deadline.
    pub(crate) fn check_deadline(&self, now: Instant) {
        let expired = {
            let heartbeat = self.lock_heartbeat();
            heartbeat.outstanding_since().is_some_and(|sent_at| {
                let since = sent_at.max(heartbeat.last_activity);
                now.saturating_duration_since(since) >= self.settings.timeout
            })
        };

        if expired && self.state.is_valid() {
            tracing::warn!(
                connection = %self.id,
                timeout_ms = self.settings.timeout.as_millis() as u64,
                "Heartbeat timed out, connection is no longer valid"
            );
            metrics::record_heartbeat_timeout();
            self.invalidate(false, LdapError::heartbeat_timeout(self.settings.timeout));
        }
    }

    /// Move to Invalid, release in-flight requests and fail the queue.
    fn invalidate(&self, is_disconnect_notification: bool, error: LdapError) {
        self.failure.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(error.clone());
            true
        });

        if self.state.notify_connection_error(is_disconnect_notification, &error) {
            metrics::record_connection_invalidated();
            tracing::debug!(connection = %self.id, error = %error, "Connection invalidated");
        }
        self.fail_queued(&error);
    }

    pub(crate) fn close(&self) {
        if !self.state.notify_connection_closed() {
            return;
        }

        let closed = LdapError::closed_by_client();
        self.failure.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(closed.clone());
            true
        });
        self.fail_queued(&closed);

        let relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(relay) = relay {
            self.raw.remove_connection_event_listener(&relay);
        }
        if let Some(factory) = self.factory.upgrade() {
            factory.deregister(self.id);
        }
        self.raw.close();
        tracing::trace!(connection = %self.id, "Heartbeat connection closed");
    }
}

async fn wait_for_failure(failure: &mut watch::Receiver<Option<LdapError>>) -> LdapError {
    loop {
        if failure.changed().await.is_err() {
            return LdapError::closed_by_client();
        }
        if let Some(error) = failure.borrow_and_update().as_ref().cloned() {
            return error;
        }
    }
}
