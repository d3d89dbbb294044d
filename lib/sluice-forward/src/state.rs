//! State shared between the forwarder's tasks.
//!
//! # Locking
//!
//! Two independent locks exist:
//!
//! - the handle lock ([`Shared::lock_handle`]), guarding the connection handle and the per-interval forwarded count,
//!   which may be held across writes to the connection
//! - the connection state (a `watch` channel), which doubles as the "reconnect in progress" flag and is only ever held
//!   for the duration of a check-and-set
//!
//! The connection state may be updated while the handle lock is held, but the handle lock is never acquired while the
//! connection state is borrowed. Checking whether a reconnect is in progress therefore never waits behind a slow write.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tracing::debug;

use crate::stats::StatsSink;

/// State of the connection to the downstream consumer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// No connection attempt has been requested yet.
    Idle,

    /// A connection attempt is in progress.
    ///
    /// Records dequeued in this state are dropped.
    Reconnecting,

    /// A connection handle has been published.
    Connected,

    /// The retry budget was exhausted. Terminal until the forwarder is restarted.
    PermanentlyFailed {
        /// Number of dial attempts made.
        attempts: usize,
    },

    /// The forwarder was stopped.
    Stopped,
}

pub(crate) struct HandleState<C> {
    pub connection: Option<C>,
    pub forwarded: u64,
}

pub(crate) struct Shared<C> {
    handle: Mutex<HandleState<C>>,
    state: watch::Sender<ConnectionState>,
    stats_sink: RwLock<Option<Arc<dyn StatsSink>>>,
}

impl<C> Shared<C> {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(HandleState {
                connection: None,
                forwarded: 0,
            }),
            state: watch::Sender::new(ConnectionState::Idle),
            stats_sink: RwLock::new(None),
        }
    }

    pub async fn lock_handle(&self) -> MutexGuard<'_, HandleState<C>> {
        self.handle.lock().await
    }

    pub fn blocking_lock_handle(&self) -> MutexGuard<'_, HandleState<C>> {
        self.handle.blocking_lock()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.connection_state() == ConnectionState::Reconnecting
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Marks a reconnect as in progress, unless one already is or the forwarder can no longer reconnect.
    ///
    /// Returns `true` if the caller is now responsible for getting the reconnect performed.
    pub fn begin_reconnect(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            ConnectionState::Idle | ConnectionState::Connected => {
                *state = ConnectionState::Reconnecting;
                true
            }
            ConnectionState::Reconnecting | ConnectionState::PermanentlyFailed { .. } | ConnectionState::Stopped => {
                false
            }
        })
    }

    pub fn set_stats_sink(&self, sink: Arc<dyn StatsSink>) {
        *self.stats_sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    pub fn stats_sink(&self) -> Option<Arc<dyn StatsSink>> {
        self.stats_sink.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Requests reconnects from the connection manager.
pub(crate) struct ReconnectTrigger<C> {
    shared: Arc<Shared<C>>,
    requests: mpsc::Sender<()>,
}

impl<C> ReconnectTrigger<C> {
    pub fn new(shared: Arc<Shared<C>>, requests: mpsc::Sender<()>) -> Self {
        Self { shared, requests }
    }

    /// Requests a reconnect.
    ///
    /// This never waits: if a reconnect is already in progress the request is a no-op, and otherwise the single pending
    /// request slot is guaranteed to be free.
    pub fn request(&self) -> bool {
        if !self.shared.begin_reconnect() {
            debug!("Reconnect already in progress or no longer possible. Ignoring request.");
            return false;
        }

        if self.requests.try_send(()).is_err() {
            // Only happens once the connection manager has exited, at which point there is nothing to reconnect for.
            debug!("Connection manager is not running. Dropping reconnect request.");
            return false;
        }

        true
    }
}

impl<C> Clone for ReconnectTrigger<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            requests: self.requests.clone(),
        }
    }
}
