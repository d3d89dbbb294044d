use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use url::Url;

/// Address of the downstream consumer.
///
/// In textual form, forward addresses are URLs whose scheme selects the transport. A bare path, with no scheme, is
/// taken to be a Unix stream socket.
///
/// ## Examples
///
/// - `unix:///var/run/sluice/out.sock` (Unix stream socket at `/var/run/sluice/out.sock`)
/// - `/var/run/sluice/out.sock` (same as above)
/// - `tcp://127.0.0.1:9000` (TCP, IPv4 loopback, port 9000)
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub enum ForwardAddress {
    /// A TCP address.
    Tcp(SocketAddr),

    /// A Unix stream socket path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl ForwardAddress {
    /// Returns the transport name of the address.
    pub const fn transport_type(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            #[cfg(unix)]
            Self::Unix(_) => "unix",
        }
    }

    /// Returns the socket path if this is a Unix stream socket address.
    pub fn as_unix_path(&self) -> Option<&Path> {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for ForwardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl TryFrom<String> for ForwardAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl<'a> TryFrom<&'a str> for ForwardAddress {
    type Error = String;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err("forward address cannot be empty".to_string());
        }

        let url = match Url::parse(value) {
            Ok(url) => url,
            #[cfg(unix)]
            Err(url::ParseError::RelativeUrlWithoutBase) => return Ok(Self::Unix(PathBuf::from(value))),
            Err(e) => return Err(e.to_string()),
        };

        match url.scheme() {
            "tcp" => {
                let mut socket_addresses = url.socket_addrs(|| None).map_err(|e| e.to_string())?;
                if socket_addresses.is_empty() {
                    Err("forward address must resolve to at least one valid IP address/port pair".to_string())
                } else {
                    Ok(Self::Tcp(socket_addresses.swap_remove(0)))
                }
            }
            #[cfg(unix)]
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err("socket path cannot be empty".to_string());
                }

                Ok(Self::Unix(PathBuf::from(path)))
            }
            scheme => Err(format!("unknown/unsupported address scheme '{}'", scheme)),
        }
    }
}
