//! TCP helpers shared by the network backends.
//!
//! - [`DialTarget`]: how a `(host, port)` pair from `dial` is interpreted
//! - [`connect`] / [`listen`]: timeouts and socket tuning applied uniformly
//!
//! # Safety
//!
//! [`enable_tcp_nodelay`] borrows the raw file descriptor/socket to set the
//! option through `socket2`. The borrow is released without closing it.

#![allow(unsafe_code)]

use crate::error::{Result, SwitchboardError};
use crate::options::TransportOptions;
use compio::net::{TcpListener, TcpStream};
use std::fmt;
use std::io;
use tracing::debug;

/// Host value that requests a listening socket instead of an outbound one.
pub const WILDCARD_HOST: &str = "*";

/// Interpretation of the `(host, port)` pair passed to `dial`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    /// Connect to a remote peer.
    Connect { host: String, port: u16 },
    /// Bind all interfaces on `port` and wait for a peer.
    Listen { port: u16 },
}

impl DialTarget {
    /// `*` means listen, anything else is a peer to connect to.
    ///
    /// ```
    /// use switchboard_core::tcp::DialTarget;
    ///
    /// assert_eq!(DialTarget::parse("*", 5555), DialTarget::Listen { port: 5555 });
    /// assert!(matches!(DialTarget::parse("localhost", 61613), DialTarget::Connect { .. }));
    /// ```
    pub fn parse(host: &str, port: u16) -> Self {
        if host == WILDCARD_HOST {
            Self::Listen { port }
        } else {
            Self::Connect {
                host: host.to_string(),
                port,
            }
        }
    }

    /// Returns true for listening targets.
    pub fn is_listen(&self) -> bool {
        matches!(self, Self::Listen { .. })
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Listen { port } => write!(f, "tcp://*:{port}"),
        }
    }
}

/// Connect to `host:port`, honoring the connect timeout and TCP_NODELAY.
///
/// # Errors
///
/// `Connection` on refusal, resolution failure or timeout.
pub async fn connect(host: &str, port: u16, options: &TransportOptions) -> Result<TcpStream> {
    let connecting = TcpStream::connect((host, port));
    let result = if options.connect_timeout.is_zero() {
        connecting.await
    } else {
        match compio::time::timeout(options.connect_timeout, connecting).await {
            Ok(result) => result,
            Err(_) => {
                return Err(SwitchboardError::connection(format!(
                    "connect to {host}:{port} timed out after {:?}",
                    options.connect_timeout
                )))
            }
        }
    };

    let stream = result.map_err(|e| {
        SwitchboardError::connection(format!("connect to {host}:{port} failed: {e}"))
    })?;
    if options.tcp_nodelay {
        enable_tcp_nodelay(&stream)
            .map_err(|e| SwitchboardError::connection(format!("TCP_NODELAY: {e}")))?;
    }

    debug!(host, port, "[TCP] Connected");
    Ok(stream)
}

/// Bind all interfaces on `port`.
///
/// # Errors
///
/// `Connection` if the address is unavailable.
pub async fn listen(port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| SwitchboardError::connection(format!("bind on port {port} failed: {e}")))?;
    debug!(port, "[TCP] Listening");
    Ok(listener)
}

/// Accept one peer from `listener`, applying TCP_NODELAY.
///
/// # Errors
///
/// `Transport` if accepting fails; accepting happens inside a streaming loop.
pub async fn accept(listener: &TcpListener, options: &TransportOptions) -> Result<TcpStream> {
    let (stream, peer) = listener
        .accept()
        .await
        .map_err(|e| SwitchboardError::transport(format!("accept failed: {e}")))?;
    if options.tcp_nodelay {
        enable_tcp_nodelay(&stream)
            .map_err(|e| SwitchboardError::transport(format!("TCP_NODELAY: {e}")))?;
    }
    debug!(%peer, "[TCP] Accepted peer");
    Ok(stream)
}

/// Enable TCP_NODELAY on a compio TcpStream.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &TcpStream) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        let result = sock.set_nodelay(true);
        std::mem::forget(sock); // Don't close the fd
        result
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        let raw = stream.as_raw_socket();
        let sock = unsafe { socket2::Socket::from_raw_socket(raw) };
        let result = sock.set_nodelay(true);
        std::mem::forget(sock); // Don't close the socket
        result
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = stream;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_target_display() {
        assert_eq!(DialTarget::parse("*", 1).to_string(), "tcp://*:1");
        assert_eq!(
            DialTarget::parse("10.0.0.1", 61613).to_string(),
            "tcp://10.0.0.1:61613"
        );
        assert!(!DialTarget::parse("0.0.0.0", 1).is_listen());
    }

    #[compio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to obtain a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = connect("127.0.0.1", port, &TransportOptions::default())
            .await
            .err()
            .expect("nothing listens on the port");
        assert!(err.is_connection_error());
    }

    #[compio::test]
    async fn test_listen_then_connect() {
        let listener = listen(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let opts = TransportOptions::default();

        let (client, server) =
            futures::join!(connect("127.0.0.1", port, &opts), accept(&listener, &opts));
        assert!(client.is_ok());
        assert!(server.is_ok());
    }
}
