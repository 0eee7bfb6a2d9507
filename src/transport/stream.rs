//! Byte-stream transports.
//!
//! A [`Transport`] produces a fresh duplex byte stream each time the
//! session (re)connects. Framing and encoding sit above it, so any
//! ordered, reliable stream works: plain TCP, an accepted TCP socket, an
//! in-memory pipe, or a TLS stream supplied by the caller.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// A duplex byte stream usable by a [`Connection`](super::Connection).
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned, type-erased stream.
pub type BoxedStream = Box<dyn AsyncStream>;

// ============================================================================
// Transport
// ============================================================================

/// Source of connections for a session.
///
/// Clients dial; servers accept. Both look the same to the session:
/// each call yields the next connected stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Produces the next connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) or
    /// [`Error::Io`](crate::Error::Io) when no stream can be established.
    async fn connect(&self) -> Result<BoxedStream>;

    /// Describes the peer for logs.
    fn peer(&self) -> String;
}
