use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::transport::Dialer;

/// An in-memory connection.
///
/// Clones share the same buffer and write counter, so a test can keep a clone to inspect what was written through a
/// connection handed out by [`ScriptedDialer`].
#[derive(Clone, Default)]
pub struct MockConnection {
    written: Arc<Mutex<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
    fail_on_write: Option<usize>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connection whose `n`-th write (starting from 1) fails with a broken pipe error.
    pub fn failing_on_write(n: usize) -> Self {
        Self {
            fail_on_write: Some(n),
            ..Self::default()
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Relaxed)
    }
}

impl AsyncWrite for MockConnection {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let n = self.writes.fetch_add(1, Relaxed) + 1;
        if self.fail_on_write == Some(n) {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }

        self.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

enum Script {
    FailThenSucceed(usize),
    AlwaysFail,
    Hang,
}

/// A dialer that follows a fixed script.
pub struct ScriptedDialer {
    script: Script,
    dials: AtomicUsize,
    connection: MockConnection,
}

impl ScriptedDialer {
    fn new(script: Script) -> Self {
        Self {
            script,
            dials: AtomicUsize::new(0),
            connection: MockConnection::new(),
        }
    }

    /// Fails the first `failures` dials, then succeeds.
    pub fn failing_then_succeeding(failures: usize) -> Self {
        Self::new(Script::FailThenSucceed(failures))
    }

    pub fn always_succeeding() -> Self {
        Self::new(Script::FailThenSucceed(0))
    }

    pub fn always_failing() -> Self {
        Self::new(Script::AlwaysFail)
    }

    /// Never completes a dial.
    pub fn hanging() -> Self {
        Self::new(Script::Hang)
    }

    /// Sets the connection handed out on a successful dial.
    pub fn with_connection(mut self, connection: MockConnection) -> Self {
        self.connection = connection;
        self
    }

    /// Returns a clone of the connection handed out on a successful dial.
    pub fn connection(&self) -> MockConnection {
        self.connection.clone()
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Relaxed)
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    type Connection = MockConnection;

    async fn dial(&self) -> io::Result<MockConnection> {
        let n = self.dials.fetch_add(1, Relaxed) + 1;
        match self.script {
            Script::FailThenSucceed(failures) if n > failures => Ok(self.connection.clone()),
            Script::FailThenSucceed(_) | Script::AlwaysFail => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            Script::Hang => std::future::pending().await,
        }
    }

    fn address(&self) -> String {
        "unix:///scripted.sock".to_string()
    }
}

/// Waits until `condition` holds, checking every 10 milliseconds, for at most `limit`.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Returns `true` if `fut` is still pending after `limit`.
pub async fn stays_pending<F: Future>(limit: Duration, fut: F) -> bool {
    tokio::time::timeout(limit, fut).await.is_err()
}
