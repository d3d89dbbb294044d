//! Transport to the downstream consumer.

use std::io;

use async_trait::async_trait;
use tokio::{io::AsyncWrite, net::TcpStream};

mod addr;
pub use self::addr::ForwardAddress;

mod connection;
pub use self::connection::Connection;

/// Opens connections to the downstream consumer.
///
/// Every call to `dial` is one connection attempt. No distinction is made between transient and permanent failures:
/// the caller decides when to give up.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connection type produced by this dialer.
    type Connection: AsyncWrite + Send + Unpin + 'static;

    /// Attempts to open a new connection.
    async fn dial(&self) -> io::Result<Self::Connection>;

    /// Human-readable address being dialed, used in diagnostics.
    fn address(&self) -> String;
}

/// Dials a stream socket at a [`ForwardAddress`].
#[derive(Clone, Debug)]
pub struct SocketDialer {
    address: ForwardAddress,
}

impl SocketDialer {
    /// Creates a new `SocketDialer` for the given address.
    pub fn new(address: ForwardAddress) -> Self {
        Self { address }
    }
}

#[async_trait]
impl Dialer for SocketDialer {
    type Connection = Connection;

    async fn dial(&self) -> io::Result<Connection> {
        match &self.address {
            ForwardAddress::Tcp(addr) => TcpStream::connect(addr).await.map(Connection::from),
            #[cfg(unix)]
            ForwardAddress::Unix(path) => tokio::net::UnixStream::connect(path).await.map(Connection::from),
        }
    }

    fn address(&self) -> String {
        self.address.to_string()
    }
}
