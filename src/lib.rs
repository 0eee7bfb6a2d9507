//! Edgelink - edge-to-cloud message transport.
//!
//! This library carries discrete, typed messages between an edge agent and
//! a cloud hub over one long-lived bidirectional connection.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐                          ┌────────────────────┐
//! │  Edge (Session)    │   Header(10) || Payload  │  Hub (Session)     │
//! │                    │◄────────────────────────►│                    │
//! │  keeper  cache     │      TCP / in-memory     │  keeper  cache     │
//! └────────────────────┘                          └────────────────────┘
//! ```
//!
//! Key properties:
//!
//! - Synchronous request/response on top of an asynchronous stream
//! - Outbound cache-and-forward across disconnections, latest value per key
//! - Automatic reconnect with a fixed backoff
//! - Payload-agnostic: content is bytes, text or JSON
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use edgelink::{Message, Result, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SessionConfig::new("cloudhub.example:10000");
//!     let (session, mut inbox) = Session::builder(config).start()?;
//!
//!     let request = Message::new("")
//!         .build_router("edged", "resource", "node/edge-1", "query")
//!         .with_content("status");
//!     let response = session.send_sync(request, Duration::from_secs(5)).await?;
//!     println!("response: {response}");
//!
//!     while let Some(msg) = inbox.recv().await {
//!         println!("notification: {msg}");
//!     }
//!
//!     session.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Framing, message model, payload encoding |
//! | [`session`] | [`Session`], keeper, outbound cache, configuration |
//! | [`transport`] | [`Transport`] trait, TCP and in-memory transports, [`Connection`] |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Wire protocol: framing, message model and encoding.
pub mod protocol;

/// Transport session: reconnect, correlation, cache-and-forward.
pub mod session;

/// Byte-stream transports and the framed connection.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{
    Content, Fingerprint, Frame, Message, MessageHeader, MessageRouter, PackageCodec,
    PackageHeader, PackageType, ProtocolVersion,
};

// Session types
pub use session::{
    Inbox, OutboundCache, PemSource, Session, SessionBuilder, SessionConfig, SessionState,
    SyncKeeper, TlsMaterial,
};

// Transport types
pub use transport::{
    Connection, ConnectionOptions, MemoryConnector, MemoryListener, TcpListenerTransport,
    TcpTransport, Transport,
};
