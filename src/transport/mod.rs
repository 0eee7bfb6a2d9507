//! Byte-stream transports and the framed connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   connect()   ┌──────────────┐   Frame = Header(10) || Payload
//! │  Transport   │──────────────►│  Connection  │◄──────────────────────────────► peer
//! │ tcp / memory │  BoxedStream  │ read / write │
//! └──────────────┘               └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Framed connection with separate read and write locks |
//! | `memory` | In-memory loopback transport |
//! | `stream` | [`Transport`] trait and boxed stream type |
//! | `tcp` | TCP dialer and listener |

// ============================================================================
// Submodules
// ============================================================================

/// Framed connection wrapper.
pub mod connection;

/// In-memory loopback transport.
pub mod memory;

/// Transport trait.
pub mod stream;

/// TCP transports.
pub mod tcp;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionOptions, DEFAULT_BUFFER_SIZE};
pub use memory::{MemoryConnector, MemoryListener};
pub use stream::{AsyncStream, BoxedStream, Transport};
pub use tcp::{TcpListenerTransport, TcpTransport};
