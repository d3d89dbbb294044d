//! Connection management.
//!
//! The connection manager is the only writer of the connection handle. It sits idle until a reconnect is requested,
//! then dials the downstream consumer until a connection is established, the retry budget is exhausted, or it is told
//! to stop. Requests are deduplicated by the caller (see [`ReconnectTrigger`][crate::state::ReconnectTrigger]), so at
//! most one reconnect is ever in flight.

use std::{io, sync::Arc, time::Duration};

use snafu::IntoError as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ConnectRetriesExhausted, ForwardError},
    state::{ConnectionState, Shared},
    transport::Dialer,
};

enum ConnectOutcome<C> {
    Connected { connection: C, attempts: usize },
    Exhausted { attempts: usize, error: io::Error },
    Stopped,
}

pub(crate) struct ConnectionManager<D: Dialer> {
    dialer: Arc<D>,
    shared: Arc<Shared<D::Connection>>,
    max_attempts: usize,
    backoff: Duration,
    failures: mpsc::UnboundedSender<ForwardError>,
    halt: CancellationToken,
}

impl<D: Dialer> ConnectionManager<D> {
    /// Creates a new `ConnectionManager`.
    ///
    /// `max_attempts` is the total number of dials allowed per reconnect, with zero meaning no limit. When a reconnect
    /// runs out of attempts, the resulting error is sent to `failures` and `halt` is cancelled.
    pub fn new(
        dialer: Arc<D>, shared: Arc<Shared<D::Connection>>, max_attempts: usize, backoff: Duration,
        failures: mpsc::UnboundedSender<ForwardError>, halt: CancellationToken,
    ) -> Self {
        Self {
            dialer,
            shared,
            max_attempts,
            backoff,
            failures,
            halt,
        }
    }

    pub async fn run(self, mut requests: mpsc::Receiver<()>, stop: CancellationToken) {
        debug!(socket_address = %self.dialer.address(), "Connection manager started.");

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => break,
                request = requests.recv() => {
                    if request.is_none() {
                        break;
                    }
                }
            }

            match self.connect(&stop).await {
                ConnectOutcome::Connected { connection, attempts } => {
                    if !self.publish(connection, &stop).await {
                        break;
                    }

                    if attempts > 1 {
                        info!(
                            socket_address = %self.dialer.address(),
                            "Connected to output socket after {} failed attempts.",
                            attempts - 1
                        );
                    } else {
                        debug!(socket_address = %self.dialer.address(), "Connected to output socket.");
                    }
                }
                ConnectOutcome::Exhausted { attempts, error } => {
                    self.shared
                        .set_connection_state(ConnectionState::PermanentlyFailed { attempts });

                    let error = ConnectRetriesExhausted {
                        address: self.dialer.address(),
                        attempts,
                    }
                    .into_error(error);
                    error!(error = %error, attempts, "Giving up on connecting to output socket.");

                    // The handler holds the receiver for as long as it exists, so this only fails during teardown.
                    let _ = self.failures.send(error);
                    self.halt.cancel();
                    break;
                }
                ConnectOutcome::Stopped => break,
            }
        }

        debug!("Connection manager stopped.");
    }

    async fn connect(&self, stop: &CancellationToken) -> ConnectOutcome<D::Connection> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;

                _ = stop.cancelled() => return ConnectOutcome::Stopped,
                result = self.dialer.dial() => result,
            };

            let error = match result {
                Ok(connection) => return ConnectOutcome::Connected { connection, attempts },
                Err(e) => e,
            };

            if self.max_attempts != 0 && attempts >= self.max_attempts {
                return ConnectOutcome::Exhausted { attempts, error };
            }

            warn!(
                error = %error,
                retry = attempts,
                max_retries = self.max_attempts,
                socket_address = %self.dialer.address(),
                "Error connecting to output socket, retrying."
            );

            tokio::select! {
                biased;

                _ = stop.cancelled() => return ConnectOutcome::Stopped,
                _ = tokio::time::sleep(self.backoff) => {},
            }
        }
    }

    /// Installs a freshly-dialed connection, unless the manager was stopped while dialing.
    async fn publish(&self, connection: D::Connection, stop: &CancellationToken) -> bool {
        let mut handle = self.shared.lock_handle().await;
        if stop.is_cancelled() {
            return false;
        }

        handle.connection = Some(connection);
        self.shared.set_connection_state(ConnectionState::Connected);
        true
    }
}
