//! Per-delegate online/offline state.
//!
//! # State Transitions
//! ```text
//! Online → Offline: an acquisition through the delegate failed
//! Offline → Online: a monitor probe obtained a connection
//! ```
//!
//! Reads are lock-free (an atomic flag consulted on every acquisition).
//! Transitions are serialized per record, and the event listener is notified
//! while the record lock is held, so notifications for one delegate always
//! alternate and never reorder.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::{ConnectionFactory, LdapError};
use crate::load_balancer::listener::LoadBalancerEventListener;

/// Availability of a delegate factory.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateState {
    Online = 0,
    Offline = 1,
}

impl From<u8> for DelegateState {
    fn from(val: u8) -> Self {
        match val {
            1 => DelegateState::Offline,
            _ => DelegateState::Online,
        }
    }
}

/// One wrapped factory with its availability and last failure.
#[derive(Debug)]
pub struct DelegateRecord {
    /// Position in the balancer's delegate list.
    pub index: usize,
    /// The wrapped factory.
    pub factory: Arc<dyn ConnectionFactory>,
    state: AtomicU8,
    /// Last acquisition error, guarded together with transitions.
    last_error: Mutex<Option<LdapError>>,
    /// Set while a monitor probe for this delegate is outstanding.
    probing: AtomicBool,
}

impl DelegateRecord {
    /// Create a record for an online delegate.
    pub fn new(index: usize, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            index,
            factory,
            state: AtomicU8::new(DelegateState::Online as u8),
            last_error: Mutex::new(None),
            probing: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> DelegateState {
        DelegateState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_online(&self) -> bool {
        self.state() == DelegateState::Online
    }

    /// The error that most recently took this delegate offline.
    pub fn last_error(&self) -> Option<LdapError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a failed acquisition.
    ///
    /// Returns true if this call moved the delegate from Online to Offline, in
    /// which case the listener has been told.
    pub fn mark_offline(&self, error: &LdapError, listener: &dyn LoadBalancerEventListener) -> bool {
        let mut last_error = self.last_error.lock().unwrap_or_else(PoisonError::into_inner);
        *last_error = Some(error.clone());
        if self.state() == DelegateState::Offline {
            return false;
        }
        self.state.store(DelegateState::Offline as u8, Ordering::Release);
        listener.handle_connection_factory_offline(&self.factory, error);
        true
    }

    /// Record a successful probe.
    ///
    /// Returns true if this call moved the delegate from Offline to Online.
    pub fn mark_online(&self, listener: &dyn LoadBalancerEventListener) -> bool {
        let _guard = self.last_error.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() == DelegateState::Online {
            return false;
        }
        self.state.store(DelegateState::Online as u8, Ordering::Release);
        listener.handle_connection_factory_online(&self.factory);
        true
    }

    /// Claim the right to probe this delegate. Returns false if a probe is already running.
    pub fn try_begin_probe(&self) -> bool {
        self.probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_probe(&self) {
        self.probing.store(false, Ordering::Release);
    }
}
