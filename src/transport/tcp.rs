//! TCP transports.
//!
//! [`TcpTransport`] dials the cloud hub; [`TcpListenerTransport`] is the
//! hub side, handing out one accepted socket per `connect` call.
//!
//! # Example
//!
//! ```ignore
//! use edgelink::transport::{TcpListenerTransport, TcpTransport};
//!
//! let listener = TcpListenerTransport::bind("127.0.0.1:0").await?;
//! let dialer = TcpTransport::new(listener.local_addr().to_string());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::SessionConfig;

use super::stream::{BoxedStream, Transport};

// ============================================================================
// TcpTransport
// ============================================================================

/// Plaintext TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// `host:port` to dial.
    address: String,
}

impl TcpTransport {
    /// Creates a dialer for `address` (`host:port`).
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Creates a dialer from session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `dial_address` is empty or TLS
    /// material is present (this transport is plaintext; supply a
    /// TLS-capable [`Transport`] instead).
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        if config.dial_address.is_empty() {
            return Err(Error::config("dial_address is empty"));
        }
        if !config.tls.is_plaintext() {
            return Err(Error::config(
                "TLS material supplied but TcpTransport is plaintext",
            ));
        }
        Ok(Self::new(config.dial_address.clone()))
    }

    /// Returns the dial address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<BoxedStream> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| Error::transport(format!("dial {} failed: {e}", self.address)))?;
        stream.set_nodelay(true)?;

        debug!(address = %self.address, "TCP connection established");
        Ok(Box::new(stream))
    }

    fn peer(&self) -> String {
        self.address.clone()
    }
}

// ============================================================================
// TcpListenerTransport
// ============================================================================

/// Hub-side transport: each `connect` accepts the next client.
#[derive(Debug)]
pub struct TcpListenerTransport {
    /// Bound listener.
    listener: TcpListener,
    /// Address the listener is bound to.
    local_addr: SocketAddr,
}

impl TcpListenerTransport {
    /// Binds to `addr`. Use port 0 for a random port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "TCP listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Transport for TcpListenerTransport {
    async fn connect(&self) -> Result<BoxedStream> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;

        debug!(?addr, "TCP connection accepted");
        Ok(Box::new(stream))
    }

    fn peer(&self) -> String {
        format!("listener {}", self.local_addr)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::session::{PemSource, TlsMaterial};

    #[tokio::test]
    async fn test_listener_bind_random_port() {
        let listener = TcpListenerTransport::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");

        assert!(listener.local_addr().port() > 0);
        assert!(listener.peer().starts_with("listener 127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_dial_and_accept() {
        let listener = TcpListenerTransport::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let dialer = TcpTransport::new(listener.local_addr().to_string());

        let (client, server) = tokio::join!(dialer.connect(), listener.connect());
        let mut client = client.expect("dial");
        let mut server = server.expect("accept");

        client.write_all(b"hello").await.expect("write");
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListenerTransport::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr();
        drop(listener);

        let err = TcpTransport::new(addr.to_string())
            .connect()
            .await
            .err()
            .expect("nothing listening");
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[test]
    fn test_from_config_requires_address() {
        let err = TcpTransport::from_config(&SessionConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_config_rejects_tls() {
        let config = SessionConfig::new("127.0.0.1:10000").with_tls(TlsMaterial {
            ca: Some(PemSource::Path("ca.pem".into())),
            ..Default::default()
        });
        let err = TcpTransport::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_config_plaintext() {
        let transport =
            TcpTransport::from_config(&SessionConfig::new("127.0.0.1:10000")).expect("valid");
        assert_eq!(transport.address(), "127.0.0.1:10000");
    }
}
